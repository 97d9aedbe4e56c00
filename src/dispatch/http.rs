//! The HTTP dispatcher (§4.6): a single generic handler, mounted once per `(method,
//! path)` the Synchroniser attaches, that re-reads the registry on every request
//! rather than closing over a snapshot of it. This is what makes "stale route may
//! exist; missing route may not" (§3) hold without needing the router to support
//! route removal.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::engine::ExecutionEngine;
use crate::model::{HttpInvocationRequest, InvocationContext, TriggerType};
use crate::registry::TriggerRegistry;
use crate::response;

#[derive(Clone)]
pub struct HttpDispatchState {
  pub engine: Arc<ExecutionEngine>,
  pub registry: TriggerRegistry,
}

/// Mounted by the Synchroniser at the exact path/method an `HttpRouteEntry` names
/// (§4.4). Looks the route up again here, rather than trusting the caller already
/// resolved it, so a route that was unregistered after the router attached it
/// surfaces as "function not found" instead of invoking stale state.
pub async fn handle(
  State(state): State<HttpDispatchState>,
  method: Method,
  headers: HeaderMap,
  uri: axum::http::Uri,
  body: Bytes,
) -> Response {
  let path = uri.path();

  let Some(route) = state.registry.lookup_http(method.as_str(), path) else {
    return (StatusCode::NOT_FOUND, "no function registered for this route").into_response();
  };

  let request = HttpInvocationRequest {
    method: method.to_string(),
    url: uri.to_string(),
    headers: headers
      .iter()
      .filter_map(|(name, value)| Some((name.to_string(), value.to_str().ok()?.to_string())))
      .collect(),
    body: String::from_utf8_lossy(&body).to_string(),
  };

  let ctx = InvocationContext::new(route.function_id.clone(), TriggerType::Http).with_request(request);
  let result = state.engine.execute(ctx).await;

  if !result.success {
    let message = result.error_message.unwrap_or_else(|| "unknown error".to_string());
    log::warn!("function '{}' failed: {message}", route.function_id);
    return (StatusCode::INTERNAL_SERVER_ERROR, message).into_response();
  }

  // §4.3: if the Function Definition can't be re-read at response time, fall back to
  // `text/plain` directly rather than feeding `Auto` into the classifier.
  let content_type = state
    .engine
    .preferred_content_type(&route.function_id)
    .await
    .unwrap_or(crate::model::ContentType::TextPlain);
  let projected = response::project(result.output.unwrap_or(serde_json::Value::Null), content_type);

  let status = StatusCode::from_u16(projected.status).unwrap_or(StatusCode::OK);
  let mut builder = Response::builder().status(status);
  for (key, value) in &projected.headers {
    builder = builder.header(key, value);
  }
  return builder
    .body(axum::body::Body::from(projected.body.unwrap_or_default()))
    .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response());
}
