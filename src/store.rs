//! The persistence contract the host owns (§6): lookup/query of Function Definitions
//! plus lifecycle hooks on create/update/delete of the `lambdas` collection. The
//! schema and migrations backing this collection are explicitly out of scope (§1); we
//! only need the shape of the contract plus a reference in-memory implementation to
//! drive the Control-Plane Synchroniser in tests.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::model::FunctionDefinition;

#[derive(Debug, Error)]
pub enum StoreError {
  #[error("function not found: {0}")]
  NotFound(String),
  #[error("collection does not exist")]
  NoSuchCollection,
  #[error("host capability error: {0}")]
  Host(String),
}

/// Record-lifecycle event the host fans out for every collection, including the
/// `lambdas` collection itself (§4.5). `Update` carries both the new and prior values,
/// matching `$record`/`$oldRecord` in §4.2.
#[derive(Clone, Debug)]
pub enum RecordEvent {
  Created {
    collection: String,
    record: serde_json::Value,
  },
  Updated {
    collection: String,
    record: serde_json::Value,
    old_record: serde_json::Value,
  },
  Deleted {
    collection: String,
    record: serde_json::Value,
  },
}

impl RecordEvent {
  pub fn collection(&self) -> &str {
    return match self {
      RecordEvent::Created { collection, .. } => collection,
      RecordEvent::Updated { collection, .. } => collection,
      RecordEvent::Deleted { collection, .. } => collection,
    };
  }
}

/// Persistence contract consumed by this crate (§6). Implemented by the host; a
/// reference in-memory implementation, [`InMemoryFunctionStore`], is provided for
/// tests and for exercising the Synchroniser end-to-end.
#[async_trait]
pub trait FunctionStore: Send + Sync {
  async fn get(&self, id: &str) -> Result<FunctionDefinition, StoreError>;

  /// All enabled Function Definitions, used by the Synchroniser's startup load. A
  /// missing collection is reported as [`StoreError::NoSuchCollection`] rather than an
  /// empty list, so the caller can log-and-continue distinctly (§4.5 step 2).
  async fn list_enabled(&self) -> Result<Vec<FunctionDefinition>, StoreError>;
}

/// Generic host capability for reading/mutating arbitrary collections, bound into the
/// script as `$app` (§4.2). Its method set is intentionally small and opaque-ish: the
/// specification does not define the full surface, only that it is passed through.
/// Synchronous by design — invocations run on a dedicated script-execution thread
/// (§4.1), not inside an async context, so there is nothing to `.await` here.
pub trait AppCapability: Send + Sync {
  fn get_record(&self, collection: &str, id: &str) -> Option<serde_json::Value>;
  fn query(&self, collection: &str, filter: &serde_json::Value) -> Vec<serde_json::Value>;
  fn save_record(&self, collection: &str, record: serde_json::Value) -> serde_json::Value;
}

/// In-memory reference implementation of both [`FunctionStore`] and a minimal
/// [`crate::store::RecordEventBus`] for tests. Not meant for production use — the host
/// owns the real persistence layer.
pub struct InMemoryFunctionStore {
  functions: RwLock<HashMap<String, FunctionDefinition>>,
}

impl InMemoryFunctionStore {
  pub fn new() -> Self {
    return Self {
      functions: RwLock::new(HashMap::new()),
    };
  }

  pub fn insert(&self, def: FunctionDefinition) {
    self.functions.write().insert(def.id.clone(), def);
  }

  pub fn remove(&self, id: &str) -> Option<FunctionDefinition> {
    return self.functions.write().remove(id);
  }
}

impl Default for InMemoryFunctionStore {
  fn default() -> Self {
    return Self::new();
  }
}

#[async_trait]
impl FunctionStore for InMemoryFunctionStore {
  async fn get(&self, id: &str) -> Result<FunctionDefinition, StoreError> {
    return self
      .functions
      .read()
      .get(id)
      .cloned()
      .ok_or_else(|| StoreError::NotFound(id.to_string()));
  }

  async fn list_enabled(&self) -> Result<Vec<FunctionDefinition>, StoreError> {
    return Ok(
      self
        .functions
        .read()
        .values()
        .filter(|d| d.enabled)
        .cloned()
        .collect(),
    );
  }
}

/// Fan-out point for record-lifecycle events (§4.6, DB dispatcher, and §4.5, the
/// Synchroniser's own subscription): every subscriber gets its own channel and
/// receives every create/update/delete across all collections, the same shape as the
/// teacher's `SubscriptionManager` (`records/subscribe.rs`), where each subscription
/// owns a private `sender` and the manager iterates the subscriber list on every
/// mutation. A single shared `async_channel::Receiver` would be wrong here: cloning
/// one receiver makes its clones *competing* consumers (each published event goes to
/// exactly one clone), not independent broadcast listeners — fatal for this bus, since
/// the Synchroniser and the DB dispatcher must both see every event.
#[derive(Clone, Default)]
pub struct RecordEventBus {
  subscribers: Arc<RwLock<Vec<async_channel::Sender<RecordEvent>>>>,
}

impl RecordEventBus {
  pub fn new() -> Self {
    return Self::default();
  }

  /// Sends `event` to every current subscriber independently. A subscriber whose
  /// receiver has been dropped is pruned from the list rather than logged on every
  /// publish.
  pub fn publish(&self, event: RecordEvent) {
    self.subscribers.write().retain(|sender| {
      return sender.try_send(event.clone()).is_ok();
    });
  }

  /// Registers a new, independent subscriber and returns its receiver. Every event
  /// published after this call (and only after) is delivered to it.
  pub fn subscribe(&self) -> async_channel::Receiver<RecordEvent> {
    let (sender, receiver) = async_channel::unbounded();
    self.subscribers.write().push(sender);
    return receiver;
  }
}

impl Default for RecordEventBus {
  fn default() -> Self {
    return Self::new();
  }
}

pub type SharedAppCapability = Arc<dyn AppCapability>;

/// Trivial `$app` implementation backed by an in-process map, used in tests and
/// examples. Mirrors the shape of a real record store closely enough to exercise
/// `$app.get`/`$app.query`/`$app.save` from script.
pub struct InMemoryAppCapability {
  collections: RwLock<HashMap<String, Vec<serde_json::Value>>>,
}

impl InMemoryAppCapability {
  pub fn new() -> Self {
    return Self {
      collections: RwLock::new(HashMap::new()),
    };
  }
}

impl Default for InMemoryAppCapability {
  fn default() -> Self {
    return Self::new();
  }
}

impl AppCapability for InMemoryAppCapability {
  fn get_record(&self, collection: &str, id: &str) -> Option<serde_json::Value> {
    return self
      .collections
      .read()
      .get(collection)?
      .iter()
      .find(|r| r.get("id").and_then(|v| v.as_str()) == Some(id))
      .cloned();
  }

  fn query(&self, collection: &str, _filter: &serde_json::Value) -> Vec<serde_json::Value> {
    return self
      .collections
      .read()
      .get(collection)
      .cloned()
      .unwrap_or_default();
  }

  fn save_record(&self, collection: &str, record: serde_json::Value) -> serde_json::Value {
    self
      .collections
      .write()
      .entry(collection.to_string())
      .or_default()
      .push(record.clone());
    return record;
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::ContentType;

  fn def(id: &str) -> FunctionDefinition {
    return FunctionDefinition {
      id: id.to_string(),
      name: id.to_string(),
      enabled: true,
      code: "1".into(),
      timeout_ms: None,
      content_type: ContentType::Auto,
      env_vars: String::new(),
      triggers: String::new(),
    };
  }

  #[tokio::test]
  async fn test_in_memory_store_round_trip() {
    let store = InMemoryFunctionStore::new();
    store.insert(def("f1"));

    assert_eq!(store.get("f1").await.unwrap().id, "f1");
    assert_eq!(store.list_enabled().await.unwrap().len(), 1);

    store.remove("f1");
    assert!(matches!(store.get("f1").await, Err(StoreError::NotFound(_))));
  }

  #[tokio::test]
  async fn test_record_event_bus_fan_out() {
    let bus = RecordEventBus::new();
    let rx = bus.subscribe();

    bus.publish(RecordEvent::Created {
      collection: "orders".into(),
      record: serde_json::json!({"id": "1"}),
    });

    let event = rx.recv().await.unwrap();
    assert_eq!(event.collection(), "orders");
  }

  #[tokio::test]
  async fn test_record_event_bus_delivers_to_every_subscriber() {
    let bus = RecordEventBus::new();
    let rx_a = bus.subscribe();
    let rx_b = bus.subscribe();

    bus.publish(RecordEvent::Created {
      collection: "lambdas".into(),
      record: serde_json::json!({"id": "1"}),
    });

    // Both subscribers must observe the event independently: this is not a
    // competing-consumer queue where the event goes to only one of them.
    assert_eq!(rx_a.recv().await.unwrap().collection(), "lambdas");
    assert_eq!(rx_b.recv().await.unwrap().collection(), "lambdas");
  }
}
