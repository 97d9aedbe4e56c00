//! End-to-end coverage of the six scenarios in spec §8 (S1-S8) driven through a real
//! `axum_test::TestServer`, the same harness the teacher's own
//! `trailbase-core/tests/integration_test.rs` uses for its record-API round trips.
//! Only runs under the `v8` feature since these scenarios need a real script
//! evaluation, not just registry bookkeeping.

#![cfg(feature = "v8")]

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{delete, get, post, put};
use axum::Router;
use axum_test::TestServer;
use parking_lot::Mutex;

use lambda_runtime::dispatch::http::HttpDispatchState;
use lambda_runtime::model::{ContentType, FunctionDefinition};
use lambda_runtime::store::{InMemoryAppCapability, InMemoryFunctionStore, RecordEvent};
use lambda_runtime::{LambdaRuntime, RouterHandle, RuntimeConfig};

fn def(id: &str, code: &str, timeout_ms: u64, content_type: ContentType, triggers: &str) -> FunctionDefinition {
  return FunctionDefinition {
    id: id.to_string(),
    name: id.to_string(),
    enabled: true,
    code: code.to_string(),
    timeout_ms: Some(timeout_ms),
    content_type,
    env_vars: String::new(),
    triggers: triggers.to_string(),
  };
}

/// A `RouterHandle` that records every attachment, mimicking the host's real router
/// closely enough that a test can replay the attachments onto an actual `axum::Router`
/// once startup has settled.
#[derive(Clone, Default)]
struct RecordingRouter {
  attached: Arc<Mutex<Vec<(String, String)>>>,
}

impl RouterHandle for RecordingRouter {
  fn attach(&self, method: &str, path: &str) {
    self.attached.lock().push((method.to_string(), path.to_string()));
  }
}

fn mount(router: Router<HttpDispatchState>, method: &str, path: &str) -> Router<HttpDispatchState> {
  let handler = lambda_runtime::dispatch::http::handle;
  return match method {
    "GET" => router.route(path, get(handler)),
    "POST" => router.route(path, post(handler)),
    "PUT" => router.route(path, put(handler)),
    "DELETE" => router.route(path, delete(handler)),
    other => panic!("unsupported method in test: {other}"),
  };
}

fn build_router(state: HttpDispatchState, attached: &[(String, String)]) -> Router {
  let mut router = Router::new();
  for (method, path) in attached {
    router = mount(router, method, path);
  }
  return router.with_state(state);
}

async fn server_with(defs: Vec<FunctionDefinition>) -> anyhow::Result<TestServer> {
  let _ = env_logger::builder().is_test(true).try_init();

  let store = Arc::new(InMemoryFunctionStore::new());
  for def in defs {
    store.insert(def);
  }

  let router = Arc::new(RecordingRouter::default());
  let runtime = LambdaRuntime::new(
    RuntimeConfig::default(),
    store,
    Arc::new(InMemoryAppCapability::new()),
    router.clone(),
  );
  runtime.start().await;

  let attached = router.attached.lock().clone();
  let axum_router = build_router(runtime.http_dispatch_state(), &attached);

  return Ok(TestServer::new(axum_router)?);
}

#[tokio::test]
async fn s1_html_page() {
  let server = server_with(vec![def(
    "f-html",
    r#"({status: 200, body: "<!DOCTYPE html><html><body>hi</body></html>"})"#,
    1_000,
    ContentType::Auto,
    r#"{"http":[{"method":"GET","path":"/ui"}]}"#,
  )])
  .await
  .unwrap();

  let response = server.get("/ui").await;
  response.assert_status_ok();
  response.assert_header("content-type", "text/html");
  assert!(response.text().contains("hi"));
}

#[tokio::test]
async fn s2_manual_content_type_header_wins() {
  let server = server_with(vec![def(
    "f-api",
    r#"({status: 201, headers: {"Content-Type": "application/custom+json"}, body: JSON.stringify({ok: true})})"#,
    1_000,
    ContentType::Auto,
    r#"{"http":[{"method":"POST","path":"/api/x"}]}"#,
  )])
  .await
  .unwrap();

  let response = server.post("/api/x").await;
  response.assert_status(axum::http::StatusCode::CREATED);
  response.assert_header("content-type", "application/custom+json");
  assert_eq!(response.json::<serde_json::Value>(), serde_json::json!({"ok": true}));
}

#[tokio::test]
async fn s3_bare_payload_is_200_json() {
  let server = server_with(vec![def(
    "f-ping",
    "({pong: true})",
    1_000,
    ContentType::Auto,
    r#"{"http":[{"method":"GET","path":"/ping"}]}"#,
  )])
  .await
  .unwrap();

  let response = server.get("/ping").await;
  response.assert_status_ok();
  response.assert_header("content-type", "application/json");
  assert_eq!(response.json::<serde_json::Value>(), serde_json::json!({"pong": true}));
}

#[tokio::test]
async fn s4_timeout_surfaces_as_500_within_bound() {
  let server = server_with(vec![def(
    "f-slow",
    "while (true) {}",
    300,
    ContentType::Auto,
    r#"{"http":[{"method":"GET","path":"/slow"}]}"#,
  )])
  .await
  .unwrap();

  let started = std::time::Instant::now();
  let response = server.get("/slow").await;
  let elapsed = started.elapsed();

  response.assert_status(axum::http::StatusCode::INTERNAL_SERVER_ERROR);
  assert_eq!(response.text(), "execution timeout");
  assert!(elapsed >= Duration::from_millis(300));
  assert!(elapsed <= Duration::from_millis(1_500));
}

#[tokio::test]
async fn s7_function_disabled_between_registration_and_dispatch() {
  let defn = def(
    "f-toggle",
    "1",
    1_000,
    ContentType::Auto,
    r#"{"http":[{"method":"GET","path":"/toggle"}]}"#,
  );
  let store = Arc::new(InMemoryFunctionStore::new());
  store.insert(defn.clone());

  let router = Arc::new(RecordingRouter::default());
  let runtime = LambdaRuntime::new(
    RuntimeConfig::default(),
    store.clone(),
    Arc::new(InMemoryAppCapability::new()),
    router.clone(),
  );
  runtime.start().await;

  let attached = router.attached.lock().clone();
  let axum_router = build_router(runtime.http_dispatch_state(), &attached);
  let server = TestServer::new(axum_router).unwrap();

  let mut disabled = defn;
  disabled.enabled = false;
  store.insert(disabled);

  let response = server.get("/toggle").await;
  response.assert_status(axum::http::StatusCode::INTERNAL_SERVER_ERROR);
  assert_eq!(response.text(), "function is disabled");
}

#[tokio::test]
async fn s8_auto_detect_css() {
  let server = server_with(vec![def(
    "f-css",
    r#"({body: "body { color: #333; margin: 0; }"})"#,
    1_000,
    ContentType::Auto,
    r#"{"http":[{"method":"GET","path":"/style.css"}]}"#,
  )])
  .await
  .unwrap();

  let response = server.get("/style.css").await;
  response.assert_header("content-type", "text/css");
}

#[tokio::test]
async fn s6_db_replace_retires_old_route_and_attaches_new() {
  let store = Arc::new(InMemoryFunctionStore::new());
  let router = Arc::new(RecordingRouter::default());
  let runtime = LambdaRuntime::new(
    RuntimeConfig::default(),
    store.clone(),
    Arc::new(InMemoryAppCapability::new()),
    router.clone(),
  );
  runtime.start().await;

  let original = def("f-route", "1", 1_000, ContentType::Auto, r#"{"http":[{"method":"GET","path":"/a"}]}"#);
  runtime.record_events.publish(RecordEvent::Created {
    collection: "lambdas".to_string(),
    record: serde_json::to_value(&original).unwrap(),
  });
  tokio::time::sleep(Duration::from_millis(20)).await;

  let updated = def("f-route", "1", 1_000, ContentType::Auto, r#"{"http":[{"method":"GET","path":"/b"}]}"#);
  runtime.record_events.publish(RecordEvent::Updated {
    collection: "lambdas".to_string(),
    record: serde_json::to_value(&updated).unwrap(),
    old_record: serde_json::to_value(&original).unwrap(),
  });
  tokio::time::sleep(Duration::from_millis(20)).await;

  assert!(runtime.registry.lookup_http("GET", "/a").is_none());
  assert!(runtime.registry.lookup_http("GET", "/b").is_some());

  let attached = router.attached.lock().clone();
  assert!(attached.iter().any(|(_, p)| p == "/a"));
  assert!(attached.iter().any(|(_, p)| p == "/b"));
}
