//! The DB dispatcher (§4.6): a single subscriber to every record create/update/delete
//! event, fanning out to whichever functions subscribed to that `(collection, event)`
//! pair. Each match runs as a detached task so a slow or runaway function can never
//! block the database operation that produced the event.

use std::sync::Arc;

use crate::engine::ExecutionEngine;
use crate::model::{DbEventKind, InvocationContext, TriggerType};
use crate::registry::TriggerRegistry;
use crate::store::{RecordEvent, RecordEventBus};

/// Runs until the bus is closed. Intended to be `tokio::spawn`ed once at startup by
/// the Lifecycle Coordinator, after the registry has been populated (§4.7c).
pub async fn run(bus: RecordEventBus, registry: TriggerRegistry, engine: Arc<ExecutionEngine>) {
  let receiver = bus.subscribe();
  while let Ok(event) = receiver.recv().await {
    dispatch_event(&registry, &engine, event);
  }
  log::info!("record event bus closed, db dispatcher exiting");
}

fn dispatch_event(registry: &TriggerRegistry, engine: &Arc<ExecutionEngine>, event: RecordEvent) {
  let (event_kind, record, old_record) = match &event {
    RecordEvent::Created { record, .. } => (DbEventKind::Create, record.clone(), None),
    RecordEvent::Updated { record, old_record, .. } => {
      (DbEventKind::Update, record.clone(), Some(old_record.clone()))
    }
    RecordEvent::Deleted { record, .. } => (DbEventKind::Delete, record.clone(), None),
  };

  let matches = registry.lookup_db(event.collection(), event_kind);
  for entry in matches {
    let engine = engine.clone();
    let record = record.clone();
    let old_record = old_record.clone();
    let function_id = entry.function_id.clone();

    tokio::spawn(async move {
      let ctx = InvocationContext::new(function_id.clone(), TriggerType::Database)
        .with_record(record, old_record);
      let result = engine.execute(ctx).await;
      if !result.success {
        log::warn!(
          "db-triggered function '{function_id}' failed: {}",
          result.error_message.unwrap_or_default()
        );
      }
    });
  }
}
