#![forbid(unsafe_code)]
#![allow(clippy::needless_return)]

pub mod context;
pub mod dispatch;
pub mod engine;
pub mod lifecycle;
pub mod model;
pub mod registry;
pub mod response;
pub mod scheduler;
pub mod store;
pub mod sync;

pub use engine::{EngineError, ExecutionEngine};
pub use lifecycle::InFlightGuard;
pub use model::{FunctionDefinition, InvocationContext, InvocationResult, TriggerConfig, TriggerType};
pub use registry::TriggerRegistry;
pub use store::{AppCapability, FunctionStore, RecordEvent, RecordEventBus, StoreError};
pub use sync::{RouterHandle, SyncError, Synchroniser};

/// Small, `Default`-able config struct supplied at construction, mirroring the
/// teacher's `AppStateArgs`/`ServerOptions` pattern (§10.3): a plain struct rather
/// than a parsed file, since the persisted config format belongs to the host.
#[derive(Clone, Debug)]
pub struct RuntimeConfig {
  /// Default per-invocation timeout when a Function Definition's own `timeout_ms` is
  /// unset (§3).
  pub default_timeout_ms: u64,
  /// Name of the host's persisted function-definitions collection, used only to
  /// scope the Synchroniser's record-lifecycle subscription (§4.5 step 1).
  pub function_collection_name: String,
  /// Upper bound the Lifecycle Coordinator waits for in-flight invocations to drain
  /// on shutdown before proceeding regardless (§11).
  pub shutdown_drain_timeout_ms: u64,
}

impl Default for RuntimeConfig {
  fn default() -> Self {
    return Self {
      default_timeout_ms: 5_000,
      function_collection_name: "lambdas".to_string(),
      shutdown_drain_timeout_ms: 5_000,
    };
  }
}

/// Wires every component together: the registry, the engine, the synchroniser, and
/// the dispatchers, in the order the Lifecycle Coordinator expects (§4.7). This is
/// the crate's single entry point for a host embedding the runtime; everything else
/// is usable standalone for hosts that want to assemble the pieces differently.
pub struct LambdaRuntime {
  pub config: RuntimeConfig,
  pub engine: std::sync::Arc<ExecutionEngine>,
  pub registry: TriggerRegistry,
  pub synchroniser: std::sync::Arc<Synchroniser>,
  pub record_events: RecordEventBus,
  tasks: std::sync::Arc<scheduler::TaskRegistry>,
}

impl LambdaRuntime {
  pub fn new(
    config: RuntimeConfig,
    store: std::sync::Arc<dyn FunctionStore>,
    app: store::SharedAppCapability,
    router: std::sync::Arc<dyn RouterHandle>,
  ) -> Self {
    let tasks = std::sync::Arc::new(scheduler::TaskRegistry::new());
    let registry = TriggerRegistry::new(tasks.clone());
    let engine = std::sync::Arc::new(ExecutionEngine::new(store.clone(), app, config.clone()));
    let cron_callback = dispatch::cron::callback(engine.clone());
    let synchroniser = std::sync::Arc::new(Synchroniser::new(
      store,
      registry.clone(),
      router,
      cron_callback,
    ));
    let record_events = RecordEventBus::new();

    return Self {
      config,
      engine,
      registry,
      synchroniser,
      record_events,
      tasks,
    };
  }

  /// Runs the ordered startup sequence and spawns the record-lifecycle watcher and DB
  /// dispatcher loops. Returns once the registry is fully populated from persistence
  /// and the router has been reconciled; the spawned loops keep running in the
  /// background (§4.7).
  pub async fn start(&self) {
    tokio::spawn(
      self
        .synchroniser
        .clone()
        .watch(self.record_events.clone(), self.config.function_collection_name.clone()),
    );

    lifecycle::startup(&self.synchroniser).await;

    lifecycle::spawn_db_dispatcher(self.record_events.clone(), self.registry.clone(), self.engine.clone());
  }

  pub async fn shutdown(&self) {
    let drain_timeout = std::time::Duration::from_millis(self.config.shutdown_drain_timeout_ms);
    lifecycle::shutdown(&self.tasks, &self.engine.in_flight(), drain_timeout).await;
  }

  pub fn http_dispatch_state(&self) -> dispatch::http::HttpDispatchState {
    return dispatch::http::HttpDispatchState {
      engine: self.engine.clone(),
      registry: self.registry.clone(),
    };
  }
}
