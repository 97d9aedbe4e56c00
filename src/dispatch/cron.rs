//! The cron dispatcher (§4.6): the callback the scheduler (`crate::scheduler`) invokes
//! on each tick, wired in by `crate::registry::TriggerRegistry::register`. Builds a
//! cron `InvocationContext` and hands it to the engine; failures are logged, never
//! surfaced, since nothing is waiting on a cron tick's result.

use std::sync::Arc;

use crate::engine::ExecutionEngine;
use crate::model::{InvocationContext, TriggerType};

/// Returns the `on_cron_tick` closure `TriggerRegistry::register` expects. Kept as a
/// free function, rather than a method on `ExecutionEngine`, so the registry doesn't
/// need to know the engine type to accept it.
pub fn callback(engine: Arc<ExecutionEngine>) -> impl Fn(String) + Send + Sync + Clone + 'static {
  return move |function_id: String| {
    let engine = engine.clone();
    tokio::spawn(async move {
      let ctx = InvocationContext::new(function_id.clone(), TriggerType::Cron);
      let result = engine.execute(ctx).await;
      if !result.success {
        log::warn!(
          "cron-triggered function '{function_id}' failed: {}",
          result.error_message.unwrap_or_default()
        );
      }
    });
  };
}
