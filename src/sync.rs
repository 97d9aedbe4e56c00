//! The Control-Plane Synchroniser (§4.5): keeps the Trigger Registry in step with the
//! persisted `lambdas` collection and the host's HTTP router.

use std::sync::Arc;

use thiserror::Error;

use crate::model::FunctionDefinition;
use crate::registry::{RegistryError, TriggerRegistry};
use crate::store::{FunctionStore, RecordEvent, RecordEventBus, StoreError};

#[derive(Debug, Error)]
pub enum SyncError {
  #[error("invalid trigger configuration: {0}")]
  InvalidTriggerConfig(#[from] serde_json::Error),
  #[error(transparent)]
  Registry(#[from] RegistryError),
}

/// Host-side hook for attaching one `(method, path)` pair to the live router (§4.5
/// step 4). Implemented by the host; calling it twice for the same pair must be safe,
/// since reconciliation may run more than once before every route is attached.
pub trait RouterHandle: Send + Sync {
  fn attach(&self, method: &str, path: &str);
}

/// Drives registry population from persistence, record-lifecycle mutations, and
/// router reconciliation. Holds no state of its own beyond what it needs to reach the
/// registry, store, and router — the registry tables remain the single source of
/// truth (§9, "global mutable registry tables").
pub struct Synchroniser {
  store: Arc<dyn FunctionStore>,
  registry: TriggerRegistry,
  router: Arc<dyn RouterHandle>,
  on_cron_tick: Arc<dyn Fn(String) + Send + Sync>,
}

impl Synchroniser {
  pub fn new(
    store: Arc<dyn FunctionStore>,
    registry: TriggerRegistry,
    router: Arc<dyn RouterHandle>,
    on_cron_tick: impl Fn(String) + Send + Sync + 'static,
  ) -> Self {
    return Self {
      store,
      registry,
      router,
      on_cron_tick: Arc::new(on_cron_tick),
    };
  }

  fn cron_callback(&self) -> impl Fn(String) + Send + Sync + Clone + 'static {
    let callback = self.on_cron_tick.clone();
    return move |function_id: String| (callback)(function_id);
  }

  /// §4.5 steps 2-3: load every enabled Function Definition and register it. A
  /// missing collection, or a per-function registration failure, is logged and does
  /// not abort the load (§7, "the Synchroniser swallows per-function failures").
  pub async fn load_from_persistence(&self) {
    let definitions = match self.store.list_enabled().await {
      Ok(definitions) => definitions,
      Err(StoreError::NoSuchCollection) => {
        log::info!("lambdas collection does not exist yet, nothing to load");
        return;
      }
      Err(err) => {
        log::error!("failed to load function definitions: {err}");
        return;
      }
    };

    for def in definitions {
      if let Err(err) = self.register(&def) {
        log::warn!("failed to register function '{}': {err}", def.id);
      }
    }
  }

  fn register(&self, def: &FunctionDefinition) -> Result<(), SyncError> {
    let config = def.parsed_triggers()?;
    self.registry.register(&def.id, &config, self.cron_callback())?;
    return Ok(());
  }

  fn replace(&self, def: &FunctionDefinition) -> Result<(), SyncError> {
    let config = def.parsed_triggers()?;
    self.registry.replace(&def.id, &config, self.cron_callback())?;
    return Ok(());
  }

  /// §4.5 step 4: attach every not-yet-attached HTTP route to the live router.
  /// Idempotent — entries already marked `attached` are skipped — so it is safe to
  /// call both when the router becomes available and after every create/update.
  pub fn reconcile_router(&self) {
    for route in self.registry.all_http_routes() {
      if route.attached {
        continue;
      }
      self.router.attach(&route.method, &route.path);
      self.registry.mark_attached(&route.method, &route.path);
    }
  }

  /// §4.5, "per-record mutations": dispatches on `RecordEvent` variant for the
  /// `lambdas` collection specifically. Intended to be driven by a filtered
  /// subscription on [`RecordEventBus`] scoped to that collection name.
  pub fn on_function_record_event(&self, event: RecordEvent) {
    match event {
      RecordEvent::Created { record, .. } => self.on_created(record),
      RecordEvent::Updated { record, .. } => self.on_updated(record),
      RecordEvent::Deleted { record, .. } => self.on_deleted(record),
    }
  }

  fn on_created(&self, record: serde_json::Value) {
    match serde_json::from_value::<FunctionDefinition>(record) {
      Ok(def) => {
        if let Err(err) = self.register(&def) {
          log::warn!("failed to register newly created function '{}': {err}", def.id);
        }
        self.reconcile_router();
      }
      Err(err) => log::warn!("could not parse created function record: {err}"),
    }
  }

  fn on_updated(&self, record: serde_json::Value) {
    match serde_json::from_value::<FunctionDefinition>(record) {
      Ok(def) => {
        if let Err(err) = self.replace(&def) {
          log::warn!("failed to replace updated function '{}': {err}", def.id);
        }
        self.reconcile_router();
      }
      Err(err) => log::warn!("could not parse updated function record: {err}"),
    }
  }

  fn on_deleted(&self, record: serde_json::Value) {
    let Some(id) = record.get("id").and_then(|v| v.as_str()) else {
      log::warn!("deleted function record has no 'id' field");
      return;
    };
    self.registry.unregister(id);
  }

  /// Runs `on_function_record_event` for every event on `collection_name` received on
  /// `bus`, until the bus closes. Intended to be spawned once at startup (§4.5 step 1)
  /// so the subscription exists before bootstrap completes (§4.7c).
  pub async fn watch(self: Arc<Self>, bus: RecordEventBus, collection_name: String) {
    let receiver = bus.subscribe();
    while let Ok(event) = receiver.recv().await {
      if event.collection() == collection_name {
        self.on_function_record_event(event);
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::ContentType;
  use crate::scheduler::TaskRegistry;
  use crate::store::InMemoryFunctionStore;
  use parking_lot::Mutex;

  struct RecordingRouter {
    attached: Mutex<Vec<(String, String)>>,
  }

  impl RecordingRouter {
    fn new() -> Self {
      return Self { attached: Mutex::new(Vec::new()) };
    }
  }

  impl RouterHandle for RecordingRouter {
    fn attach(&self, method: &str, path: &str) {
      self.attached.lock().push((method.to_string(), path.to_string()));
    }
  }

  fn def(id: &str, triggers: &str) -> FunctionDefinition {
    return FunctionDefinition {
      id: id.to_string(),
      name: id.to_string(),
      enabled: true,
      code: "1".into(),
      timeout_ms: None,
      content_type: ContentType::Auto,
      env_vars: String::new(),
      triggers: triggers.to_string(),
    };
  }

  fn synchroniser() -> (Arc<Synchroniser>, Arc<InMemoryFunctionStore>, Arc<RecordingRouter>) {
    let store = Arc::new(InMemoryFunctionStore::new());
    let registry = TriggerRegistry::new(Arc::new(TaskRegistry::new()));
    let router = Arc::new(RecordingRouter::new());
    let sync = Arc::new(Synchroniser::new(
      store.clone(),
      registry,
      router.clone(),
      |_| {},
    ));
    return (sync, store, router);
  }

  #[tokio::test]
  async fn test_load_from_persistence_registers_enabled_functions() {
    let (sync, store, _router) = synchroniser();
    store.insert(def("f1", r#"{"http":[{"method":"GET","path":"/a"}]}"#));

    sync.load_from_persistence().await;

    assert!(sync.registry.lookup_http("GET", "/a").is_some());
  }

  #[tokio::test]
  async fn test_reconcile_router_attaches_once() {
    let (sync, store, router) = synchroniser();
    store.insert(def("f1", r#"{"http":[{"method":"GET","path":"/a"}]}"#));
    sync.load_from_persistence().await;

    sync.reconcile_router();
    sync.reconcile_router();

    assert_eq!(router.attached.lock().len(), 1);
  }

  #[tokio::test]
  async fn test_update_replaces_route_and_reconciles() {
    let (sync, _store, router) = synchroniser();
    sync.on_created(serde_json::to_value(def("f1", r#"{"http":[{"method":"GET","path":"/a"}]}"#)).unwrap());
    sync.reconcile_router();

    sync.on_updated(serde_json::to_value(def("f1", r#"{"http":[{"method":"GET","path":"/b"}]}"#)).unwrap());
    sync.reconcile_router();

    assert!(sync.registry.lookup_http("GET", "/a").is_none());
    assert!(sync.registry.lookup_http("GET", "/b").is_some());
    assert!(router.attached.lock().iter().any(|(_, p)| p == "/b"));
  }

  #[tokio::test]
  async fn test_delete_unregisters() {
    let (sync, _store, _router) = synchroniser();
    sync.on_created(serde_json::to_value(def("f1", r#"{"http":[{"method":"GET","path":"/a"}]}"#)).unwrap());

    sync.on_deleted(serde_json::json!({"id": "f1"}));

    assert!(sync.registry.lookup_http("GET", "/a").is_none());
  }

  #[tokio::test]
  async fn test_idempotent_startup_sequence() {
    let (sync, store, _router) = synchroniser();
    store.insert(def("f1", r#"{"http":[{"method":"GET","path":"/a"}]}"#));

    sync.load_from_persistence().await;
    let first = sync.registry.lookup_http("GET", "/a");

    sync.load_from_persistence().await;
    let second = sync.registry.lookup_http("GET", "/a");

    assert_eq!(first.unwrap().function_id, second.unwrap().function_id);
  }
}
