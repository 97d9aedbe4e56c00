//! Data model for persisted Function Definitions and the values that flow through a
//! single invocation (§3 of the specification).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Preferred content type of a Function Definition's HTTP response body. `Auto` (the
/// empty/unset value) triggers the classifier in [`crate::response`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
  #[default]
  Auto,
  #[serde(rename = "text/plain")]
  TextPlain,
  #[serde(rename = "text/html")]
  TextHtml,
  #[serde(rename = "application/json")]
  ApplicationJson,
  #[serde(rename = "text/css")]
  TextCss,
  #[serde(rename = "application/javascript")]
  ApplicationJavascript,
  #[serde(rename = "application/xml")]
  ApplicationXml,
  #[serde(rename = "text/xml")]
  TextXml,
}

impl ContentType {
  /// Returns the concrete MIME string, or `None` for `Auto`.
  pub fn mime(&self) -> Option<&'static str> {
    return match self {
      ContentType::Auto => None,
      ContentType::TextPlain => Some("text/plain"),
      ContentType::TextHtml => Some("text/html"),
      ContentType::ApplicationJson => Some("application/json"),
      ContentType::TextCss => Some("text/css"),
      ContentType::ApplicationJavascript => Some("application/javascript"),
      ContentType::ApplicationXml => Some("application/xml"),
      ContentType::TextXml => Some("text/xml"),
    };
  }
}

/// A database mutation kind a function can subscribe to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DbEventKind {
  Create,
  Update,
  Delete,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpTrigger {
  pub method: String,
  pub path: String,
}

impl HttpTrigger {
  /// Registry key, always the upper-cased method.
  pub fn key(&self) -> String {
    return format!("{}:{}", self.method.to_uppercase(), self.path);
  }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseTrigger {
  pub collection: String,
  pub event: DbEventKind,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CronTrigger {
  pub schedule: String,
}

/// Parsed form of a Function Definition's stringified `triggers` field. Up to three
/// recognised keys; any of them may be empty or absent.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerConfig {
  #[serde(default)]
  pub http: Vec<HttpTrigger>,
  #[serde(default)]
  pub database: Vec<DatabaseTrigger>,
  #[serde(default)]
  pub cron: Vec<CronTrigger>,
}

impl TriggerConfig {
  /// Parses the stringified trigger configuration. A configuration error here is a
  /// "configuration" error kind (§7): the caller should skip the function, not the
  /// whole load.
  pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
    if text.trim().is_empty() {
      return Ok(Self::default());
    }
    return serde_json::from_str(text);
  }

  pub fn is_empty(&self) -> bool {
    return self.http.is_empty() && self.database.is_empty() && self.cron.is_empty();
  }
}

/// A persisted Function Definition, i.e. one row of the host's `lambdas` collection
/// (§6, Persistence contract).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FunctionDefinition {
  pub id: String,
  pub name: String,
  pub enabled: bool,
  pub code: String,
  /// Milliseconds. `None` defers to [`crate::RuntimeConfig::default_timeout_ms`]. The
  /// host's persisted field is named `timeout`, not `timeout_ms` (§3).
  #[serde(rename = "timeout", default)]
  pub timeout_ms: Option<u64>,
  /// The host's persisted field is named `contentType`, not `content_type` (§3).
  #[serde(rename = "contentType", default)]
  pub content_type: ContentType,
  /// Stringified `key=value`-style environment mapping, as persisted.
  #[serde(default)]
  pub env_vars: String,
  /// Stringified [`TriggerConfig`], as persisted.
  #[serde(default)]
  pub triggers: String,
}

impl FunctionDefinition {
  pub fn parsed_triggers(&self) -> Result<TriggerConfig, serde_json::Error> {
    return TriggerConfig::parse(&self.triggers);
  }

  /// Parses the `env_vars` mapping. Per §4.2, a parse failure binds an empty mapping
  /// silently rather than failing the invocation.
  pub fn parsed_env(&self) -> HashMap<String, String> {
    if self.env_vars.trim().is_empty() {
      return HashMap::new();
    }
    return serde_json::from_str(&self.env_vars).unwrap_or_default();
  }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerType {
  Http,
  Database,
  Cron,
}

impl TriggerType {
  pub fn as_str(&self) -> &'static str {
    return match self {
      TriggerType::Http => "http",
      TriggerType::Database => "database",
      TriggerType::Cron => "cron",
    };
  }
}

#[derive(Clone, Debug)]
pub struct HttpInvocationRequest {
  pub method: String,
  pub url: String,
  pub headers: Vec<(String, String)>,
  pub body: String,
}

/// Everything the Execution Engine needs to run one invocation (§3, Invocation
/// Context).
#[derive(Clone, Debug)]
pub struct InvocationContext {
  pub function_id: String,
  pub trigger_type: TriggerType,
  pub request: Option<HttpInvocationRequest>,
  pub record: Option<serde_json::Value>,
  pub old_record: Option<serde_json::Value>,
  pub start_time: chrono::DateTime<chrono::Utc>,
}

impl InvocationContext {
  pub fn new(function_id: impl Into<String>, trigger_type: TriggerType) -> Self {
    return Self {
      function_id: function_id.into(),
      trigger_type,
      request: None,
      record: None,
      old_record: None,
      start_time: chrono::Utc::now(),
    };
  }

  pub fn with_request(mut self, request: HttpInvocationRequest) -> Self {
    self.request = Some(request);
    return self;
  }

  pub fn with_record(mut self, record: serde_json::Value, old_record: Option<serde_json::Value>) -> Self {
    self.record = Some(record);
    self.old_record = old_record;
    return self;
  }
}

/// Outcome of one invocation (§3, Invocation Result).
#[derive(Clone, Debug)]
pub struct InvocationResult {
  pub success: bool,
  pub output: Option<serde_json::Value>,
  pub error_message: Option<String>,
  pub duration: std::time::Duration,
}

impl InvocationResult {
  pub fn ok(output: serde_json::Value, duration: std::time::Duration) -> Self {
    return Self {
      success: true,
      output: Some(output),
      error_message: None,
      duration,
    };
  }

  pub fn failed(error_message: impl Into<String>, duration: std::time::Duration) -> Self {
    return Self {
      success: false,
      output: None,
      error_message: Some(error_message.into()),
      duration,
    };
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_trigger_config() {
    let config = TriggerConfig::parse(
      r#"{"http":[{"method":"get","path":"/ping"}],"database":[{"collection":"orders","event":"create"}],"cron":[{"schedule":"*/1 * * * *"}]}"#,
    )
    .unwrap();

    assert_eq!(config.http.len(), 1);
    assert_eq!(config.http[0].key(), "GET:/ping");
    assert_eq!(config.database[0].collection, "orders");
    assert_eq!(config.cron[0].schedule, "*/1 * * * *");
  }

  #[test]
  fn test_parse_empty_trigger_config() {
    let config = TriggerConfig::parse("").unwrap();
    assert!(config.is_empty());
  }

  #[test]
  fn test_parse_malformed_trigger_config_is_error() {
    assert!(TriggerConfig::parse("{not json}").is_err());
  }

  #[test]
  fn test_env_vars_parse_failure_is_silent() {
    let def = FunctionDefinition {
      id: "f1".into(),
      name: "test".into(),
      enabled: true,
      code: "1".into(),
      timeout_ms: None,
      content_type: ContentType::Auto,
      env_vars: "not json".into(),
      triggers: String::new(),
    };
    assert!(def.parsed_env().is_empty());
  }
}
