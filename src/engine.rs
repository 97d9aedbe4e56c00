//! The Execution Engine (§4.1): loads a Function Definition, binds a fresh isolate,
//! and evaluates the source under a deadline.
//!
//! Design decision (carried from the specification, §4.1): a runtime *pool* is
//! tempting — the teacher's own JS runtime keeps a small, fixed number of
//! long-lived V8 isolates and round-robins work across them — but clearing an
//! isolate's global state between invocations is not reliable, and user code can
//! stash mutable state anywhere reachable from `globalThis`. So every invocation here
//! gets a brand new isolate that is never reused, at the cost of isolate construction
//! overhead per call.

use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::oneshot;

use crate::context::{self, BoundContext};
use crate::lifecycle::InFlightGuard;
use crate::model::{InvocationContext, InvocationResult};
use crate::store::{FunctionStore, SharedAppCapability, StoreError};

#[derive(Debug, Error)]
pub enum EngineError {
  #[error("function not found")]
  NotFound,
  #[error("function is disabled")]
  Disabled,
  #[error("execution timeout")]
  Timeout,
  #[error("script error: {0}")]
  Script(String),
  #[error("isolate error: {0}")]
  Isolate(String),
}

pub struct ExecutionEngine {
  store: Arc<dyn FunctionStore>,
  app: SharedAppCapability,
  config: crate::RuntimeConfig,
  in_flight: InFlightGuard,
}

impl ExecutionEngine {
  pub fn new(store: Arc<dyn FunctionStore>, app: SharedAppCapability, config: crate::RuntimeConfig) -> Self {
    return Self {
      store,
      app,
      config,
      in_flight: InFlightGuard::new(),
    };
  }

  /// The in-flight counter the Lifecycle Coordinator drains on shutdown (§11). Shared,
  /// not owned, by the coordinator: it reads the same counter every execution here
  /// increments and decrements.
  pub fn in_flight(&self) -> InFlightGuard {
    return self.in_flight.clone();
  }

  /// Looks up the preferred content type for a function without running it. Used by
  /// the HTTP dispatcher after a successful execution, so the Response Projector's
  /// auto-detection has the same `ContentType` the engine itself would have used.
  pub async fn preferred_content_type(&self, function_id: &str) -> Option<crate::model::ContentType> {
    return self.store.get(function_id).await.ok().map(|def| def.content_type);
  }

  /// Runs one invocation to completion (or timeout). Never returns an `Err` — every
  /// failure kind in §7 is folded into `InvocationResult{success: false, ...}` so
  /// dispatchers never need a second error path on top of this one.
  pub async fn execute(&self, ctx: InvocationContext) -> InvocationResult {
    let _ticket = self.in_flight.enter();
    let started = Instant::now();

    let def = match self.store.get(&ctx.function_id).await {
      Ok(def) => def,
      Err(StoreError::NotFound(_)) => {
        return InvocationResult::failed(EngineError::NotFound.to_string(), started.elapsed());
      }
      Err(err) => {
        return InvocationResult::failed(format!("host capability error: {err}"), started.elapsed());
      }
    };

    if !def.enabled {
      return InvocationResult::failed(EngineError::Disabled.to_string(), started.elapsed());
    }

    let timeout = Duration::from_millis(def.timeout_ms.unwrap_or(self.config.default_timeout_ms));

    let bound = BoundContext {
      function_name: def.name.clone(),
      env: def.parsed_env(),
    };
    let prelude = context::build_prelude(&ctx, &bound);
    let source = format!("{prelude}\n{}", def.code);

    let (tx, rx) = oneshot::channel();
    let app = self.app.clone();
    let function_id = ctx.function_id.clone();

    // Abandonment, not cancellation: if the deadline below elapses first, this
    // thread is left running to completion and its eventual send is simply ignored
    // (§4.1, "the engine may let the stranded computation run to completion in
    // isolation, but its output must be discarded").
    let spawn_result = std::thread::Builder::new()
      .name(format!("lambda-exec-{function_id}"))
      .spawn(move || {
        let result = isolate::run(&source, app);
        let _ = tx.send(result);
      });

    if let Err(err) = spawn_result {
      return InvocationResult::failed(format!("failed to spawn script thread: {err}"), started.elapsed());
    }

    return match tokio::time::timeout(timeout, rx).await {
      Ok(Ok(Ok(value))) => InvocationResult::ok(value, started.elapsed()),
      Ok(Ok(Err(err))) => InvocationResult::failed(err.to_string(), started.elapsed()),
      Ok(Err(_recv_dropped)) => {
        InvocationResult::failed("script thread terminated unexpectedly", started.elapsed())
      }
      Err(_elapsed) => InvocationResult::failed(EngineError::Timeout.to_string(), started.elapsed()),
    };
  }
}

#[cfg(feature = "v8")]
mod isolate {
  use std::sync::OnceLock;

  use parking_lot::Mutex;
  use rustyscript::{Runtime, RuntimeOptions};
  use tracing_subscriber::prelude::*;

  use crate::engine::EngineError;
  use crate::store::SharedAppCapability;

  /// V8 requires its platform to be initialised exactly once per process. Isolate
  /// *construction*, however, is documented by the teacher's own runtime as prone to
  /// segfaulting when it races across OS threads — hence the short-lived global lock
  /// around `Runtime::new` below, rather than anything held for the lifetime of the
  /// isolate. Actual script execution is not serialised: many isolates can run their
  /// bodies concurrently once constructed.
  fn ensure_platform_initialized() {
    static INIT: OnceLock<()> = OnceLock::new();
    INIT.get_or_init(|| {
      rustyscript::init_platform(1, false);
    });
  }

  static ISOLATE_CREATE_LOCK: Mutex<()> = Mutex::new(());

  /// swc's codegen span tracing is spammy on every parse; install a filtering
  /// subscriber for this script-execution thread only, the same workaround the
  /// teacher's own JS runtime thread applies (it hits the same swc dependency).
  fn install_thread_tracing_filter() {
    tracing_subscriber::Registry::default()
      .with(tracing_subscriber::filter::Targets::new().with_target(
        "tracing::span",
        tracing_subscriber::filter::LevelFilter::WARN,
      ))
      .set_default();
  }

  pub(super) fn run(source: &str, app: SharedAppCapability) -> Result<serde_json::Value, EngineError> {
    install_thread_tracing_filter();
    ensure_platform_initialized();

    let mut runtime = {
      let _guard = ISOLATE_CREATE_LOCK.lock();
      Runtime::new(RuntimeOptions::default()).map_err(|err| EngineError::Isolate(err.to_string()))?
    };

    bind_app_capability(&mut runtime, app).map_err(|err| EngineError::Isolate(err.to_string()))?;

    return runtime
      .eval::<serde_json::Value>(source)
      .map_err(|err| EngineError::Script(err.to_string()));
  }

  /// Registers the native functions backing `$app`/`$template` and defines the two
  /// globals in terms of them. Kept separate from [`crate::context::build_prelude`]
  /// because only this module has access to the isolate type.
  fn bind_app_capability(runtime: &mut Runtime, app: SharedAppCapability) -> Result<(), rustyscript::Error> {
    let app_get = app.clone();
    runtime.register_function("__app_get", move |args: &[serde_json::Value]| {
      let collection = arg_str(args, 0)?;
      let id = arg_str(args, 1)?;
      return Ok(app_get.get_record(&collection, &id).unwrap_or(serde_json::Value::Null));
    })?;

    let app_query = app.clone();
    runtime.register_function("__app_query", move |args: &[serde_json::Value]| {
      let collection = arg_str(args, 0)?;
      let filter = args.get(1).cloned().unwrap_or(serde_json::Value::Null);
      return Ok(serde_json::Value::Array(app_query.query(&collection, &filter)));
    })?;

    let app_save = app.clone();
    runtime.register_function("__app_save", move |args: &[serde_json::Value]| {
      let collection = arg_str(args, 0)?;
      let record = args.get(1).cloned().unwrap_or(serde_json::Value::Null);
      return Ok(app_save.save_record(&collection, record));
    })?;

    // `$template` is a pass-through capability per §4.2; no template engine is part
    // of this crate's scope, so rendering just echoes its inputs back.
    runtime.register_function("__template_render", move |args: &[serde_json::Value]| {
      let name = arg_str(args, 0)?;
      let context = args.get(1).cloned().unwrap_or(serde_json::Value::Null);
      return Ok(serde_json::json!({ "template": name, "context": context }));
    })?;

    runtime.eval::<serde_json::Value>(
      "var $app = { \
         get: (c, id) => __app_get(c, id), \
         query: (c, f) => __app_query(c, f || {}), \
         save: (c, r) => __app_save(c, r) \
       }; \
       var $template = { render: (n, c) => __template_render(n, c || {}) }; \
       null",
    )?;

    return Ok(());
  }

  fn arg_str(args: &[serde_json::Value], i: usize) -> Result<String, rustyscript::Error> {
    return args
      .get(i)
      .and_then(|v| v.as_str())
      .map(|s| s.to_string())
      .ok_or_else(|| rustyscript::Error::Runtime(format!("expected string argument at position {i}")));
  }
}

#[cfg(not(feature = "v8"))]
mod isolate {
  use crate::engine::EngineError;
  use crate::store::SharedAppCapability;

  pub(super) fn run(_source: &str, _app: SharedAppCapability) -> Result<serde_json::Value, EngineError> {
    return Err(EngineError::Isolate(
      "script engine disabled: crate built without the 'v8' feature".to_string(),
    ));
  }
}
