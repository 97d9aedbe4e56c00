//! The Response Projector (§4.3): turns a script's final value into status, headers,
//! and body, with content-type auto-detection when the script didn't set one.

use serde_json::Value;

use crate::model::ContentType;

#[derive(Debug, Default)]
pub struct ProjectedResponse {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Option<Vec<u8>>,
}

const RECOGNISED_KEYS: [&str; 3] = ["status", "headers", "body"];

fn is_response_descriptor(value: &Value) -> bool {
  let Value::Object(map) = value else {
    return false;
  };
  return RECOGNISED_KEYS.iter().any(|key| map.contains_key(*key));
}

/// Projects a script's return value plus the preferred content type of the owning
/// Function Definition into an HTTP response shape (§4.3).
pub fn project(value: Value, preferred_content_type: ContentType) -> ProjectedResponse {
  let mut response = if is_response_descriptor(&value) {
    project_descriptor(value)
  } else {
    project_bare_payload(value)
  };

  if !has_content_type_header(&response.headers) {
    if let Some(body) = &response.body {
      let body_str = String::from_utf8_lossy(body);
      let mime = resolve_content_type(preferred_content_type, &body_str);
      response.headers.push(("Content-Type".to_string(), mime.to_string()));
    }
  }

  return response;
}

fn has_content_type_header(headers: &[(String, String)]) -> bool {
  return headers
    .iter()
    .any(|(k, _)| k.eq_ignore_ascii_case("content-type"));
}

fn project_descriptor(value: Value) -> ProjectedResponse {
  let Value::Object(mut map) = value else {
    unreachable!("caller already checked this is an object");
  };

  let status = map
    .remove("status")
    .and_then(|v| v.as_u64())
    .and_then(|v| u16::try_from(v).ok())
    .unwrap_or(200);

  let headers = match map.remove("headers") {
    Some(Value::Object(h)) => h
      .into_iter()
      .map(|(k, v)| (k, stringify_header_value(&v)))
      .collect(),
    _ => Vec::new(),
  };

  let body = match map.remove("body") {
    None => None,
    Some(Value::String(s)) => Some(s.into_bytes()),
    Some(other) => Some(serde_json::to_vec(&other).unwrap_or_default()),
  };

  return ProjectedResponse { status, headers, body };
}

fn stringify_header_value(value: &Value) -> String {
  return match value {
    Value::String(s) => s.clone(),
    other => other.to_string(),
  };
}

fn project_bare_payload(value: Value) -> ProjectedResponse {
  return ProjectedResponse {
    status: 200,
    headers: Vec::new(),
    body: Some(serde_json::to_vec(&value).unwrap_or_default()),
  };
}

/// The auto-detection classifier (§4.3). Evaluated top-to-bottom; the first matching
/// clause wins, and "otherwise" (`text/plain`) makes the classifier total.
fn classify(body: &str) -> &'static str {
  let trimmed = body.trim();
  let lower = trimmed.to_ascii_lowercase();

  if lower.starts_with("<!doctype html")
    || lower.starts_with("<html")
    || lower.contains("<body")
    || lower.contains("<div")
    || lower.contains("<span")
  {
    return "text/html";
  }

  if (trimmed.starts_with('{') && trimmed.ends_with('}'))
    || (trimmed.starts_with('[') && trimmed.ends_with(']'))
  {
    return "application/json";
  }

  if lower.starts_with("<?xml") || (trimmed.starts_with('<') && trimmed.contains('>')) {
    return "application/xml";
  }

  if trimmed.contains('{')
    && trimmed.contains('}')
    && (lower.contains("color:") || lower.contains("font-") || lower.contains("margin:") || lower.contains("padding:"))
  {
    return "text/css";
  }

  if lower.contains("function")
    || lower.contains("var ")
    || lower.contains("let ")
    || lower.contains("const ")
    || lower.contains("console.log")
    || lower.contains("document.")
  {
    return "application/javascript";
  }

  return "text/plain";
}

fn resolve_content_type(preferred: ContentType, body: &str) -> &'static str {
  if let Some(mime) = preferred.mime() {
    return mime;
  }
  return classify(body);
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::ContentType;
  use serde_json::json;

  #[test]
  fn test_s1_html_page() {
    let response = project(
      json!({"status": 200, "body": "<!DOCTYPE html><html><body>hi</body></html>"}),
      ContentType::Auto,
    );
    assert_eq!(response.status, 200);
    assert_eq!(
      response.headers,
      vec![("Content-Type".to_string(), "text/html".to_string())]
    );
  }

  #[test]
  fn test_s2_manual_header_wins() {
    let response = project(
      json!({"status": 201, "headers": {"Content-Type": "application/custom+json"}, "body": "{\"ok\":true}"}),
      ContentType::Auto,
    );
    assert_eq!(response.status, 201);
    assert_eq!(
      response.headers,
      vec![("Content-Type".to_string(), "application/custom+json".to_string())]
    );
  }

  #[test]
  fn test_s3_bare_payload() {
    let response = project(json!({"pong": true}), ContentType::Auto);
    assert_eq!(response.status, 200);
    assert_eq!(response.body.unwrap(), br#"{"pong":true}"#);
    assert_eq!(
      response.headers,
      vec![("Content-Type".to_string(), "application/json".to_string())]
    );
  }

  #[test]
  fn test_s8_auto_detect_css() {
    let response = project(
      json!({"body": "body { color: #333; margin: 0; }"}),
      ContentType::Auto,
    );
    assert_eq!(
      response.headers,
      vec![("Content-Type".to_string(), "text/css".to_string())]
    );
  }

  #[test]
  fn test_preferred_content_type_overrides_auto_detection() {
    let response = project(json!({"body": "plain text"}), ContentType::TextHtml);
    assert_eq!(
      response.headers,
      vec![("Content-Type".to_string(), "text/html".to_string())]
    );
  }

  #[test]
  fn test_no_body_means_no_content_type_header() {
    let response = project(json!({"status": 204}), ContentType::Auto);
    assert!(response.body.is_none());
    assert!(response.headers.is_empty());
  }

  #[test]
  fn test_classifier_is_total() {
    for body in ["", "hello world", "<broken", "42"] {
      let mime = classify(body);
      assert!(!mime.is_empty());
    }
  }
}
