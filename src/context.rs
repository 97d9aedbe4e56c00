//! The Context Binder (§4.2): builds the JS source prelude that defines the six
//! well-known globals ahead of the user's script body. `$app`/`$template` are bound
//! separately, as native functions, by [`crate::engine`] — this module only handles
//! the JSON-serialisable half of the contract.

use std::collections::HashMap;

use crate::model::{HttpInvocationRequest, InvocationContext, TriggerType};

/// The six global names the Context Binder owns. User code may reassign them (the
/// bindings use `var`, not `const`, precisely so a redeclaration in the user's source
/// doesn't raise a `SyntaxError`) but nothing from a previous invocation is ever
/// observable, since a fresh isolate is used for every call (§4.1).
pub const BOUND_GLOBALS: [&str; 6] = ["$app", "$template", "$env", "$trigger", "$request", "$record"];

pub struct BoundContext {
  pub function_name: String,
  pub env: HashMap<String, String>,
}

/// Renders the `var $env = ...; var $trigger = ...; ...` prelude for one invocation.
/// `$app`/`$template` are assumed to already be bound natively in the isolate this
/// prelude is evaluated in (engine.rs does that before running this source).
pub fn build_prelude(ctx: &InvocationContext, bound: &BoundContext) -> String {
  let mut lines = Vec::new();

  let env_json = serde_json::to_string(&bound.env).unwrap_or_else(|_| "{}".to_string());
  lines.push(format!("var $env = {env_json};"));

  let trigger_json = serde_json::json!({
    "type": trigger_type_str(ctx.trigger_type),
    "function": bound.function_name,
    "timestamp": ctx.start_time.timestamp(),
  });
  lines.push(format!("var $trigger = {trigger_json};"));

  if let Some(request) = &ctx.request {
    lines.push(format!("var $request = {};", request_json(request)));
  }

  if let Some(record) = &ctx.record {
    lines.push(format!("var $record = {record};"));
  }

  if let Some(old_record) = &ctx.old_record {
    lines.push(format!("var $oldRecord = {old_record};"));
  }

  return lines.join("\n");
}

fn trigger_type_str(trigger_type: TriggerType) -> &'static str {
  return trigger_type.as_str();
}

fn request_json(request: &HttpInvocationRequest) -> serde_json::Value {
  return serde_json::json!({
    "method": request.method,
    "url": request.url,
    "headers": request.headers,
    "body": request.body,
  });
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::{HttpInvocationRequest, InvocationContext, TriggerType};

  #[test]
  fn test_prelude_includes_trigger_and_env() {
    let ctx = InvocationContext::new("f1", TriggerType::Cron);
    let bound = BoundContext {
      function_name: "nightly".to_string(),
      env: [("KEY".to_string(), "VALUE".to_string())].into_iter().collect(),
    };

    let prelude = build_prelude(&ctx, &bound);
    assert!(prelude.contains("var $env = {\"KEY\":\"VALUE\"};"));
    assert!(prelude.contains("\"type\":\"cron\""));
    assert!(prelude.contains("\"function\":\"nightly\""));
    assert!(!prelude.contains("$request"));
    assert!(!prelude.contains("$record"));
  }

  #[test]
  fn test_prelude_binds_request_for_http() {
    let ctx = InvocationContext::new("f1", TriggerType::Http).with_request(HttpInvocationRequest {
      method: "GET".to_string(),
      url: "/ping".to_string(),
      headers: vec![("x-test".to_string(), "1".to_string())],
      body: String::new(),
    });
    let bound = BoundContext {
      function_name: "ping".to_string(),
      env: HashMap::new(),
    };

    let prelude = build_prelude(&ctx, &bound);
    assert!(prelude.contains("var $request"));
    assert!(prelude.contains("\"method\":\"GET\""));
  }

  #[test]
  fn test_prelude_binds_old_record_only_on_update() {
    let ctx = InvocationContext::new("f1", TriggerType::Database)
      .with_record(serde_json::json!({"id": 1}), Some(serde_json::json!({"id": 1, "v": 0})));
    let bound = BoundContext {
      function_name: "on_update".to_string(),
      env: HashMap::new(),
    };

    let prelude = build_prelude(&ctx, &bound);
    assert!(prelude.contains("var $record = {\"id\":1};"));
    assert!(prelude.contains("var $oldRecord"));
  }
}
