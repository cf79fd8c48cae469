//! Redaction and size-bounding of request data before it is logged or
//! exported.

use serde_json::{json, Value};
use std::collections::BTreeMap;

/// Serialized body size ceiling before wholesale truncation.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Serialized header size ceiling before wholesale truncation.
pub const MAX_HEADER_BYTES: usize = 64 * 1024;

pub const REDACTED: &str = "[REDACTED]";

/// Body fields redacted by name, compared case-insensitively.
const SENSITIVE_FIELDS: [&str; 5] = ["password", "token", "secret", "key", "authorization"];

/// Headers redacted by exact name.
const SENSITIVE_HEADERS: [&str; 4] = ["authorization", "cookie", "api-key", "auth-token"];

/// Marker object substituted for oversized payload content.
pub fn truncation_marker(reason: &str, original_size: usize) -> Value {
    json!({
        "truncated": true,
        "reason": reason,
        "original_size": original_size,
    })
}

/// Serialized JSON length of any serializable value; 0 when serialization
/// fails, rather than propagating an error.
pub fn serialized_len<T: serde::Serialize>(value: &T) -> usize {
    serde_json::to_string(value).map(|s| s.len()).unwrap_or(0)
}

/// Serialized size of a value in bytes. Returns 0 for absent/null input and
/// 0 when serialization fails, rather than propagating an error.
pub fn calculate_size(data: Option<&Value>) -> usize {
    match data {
        None | Some(Value::Null) => 0,
        Some(Value::String(s)) => s.chars().count(),
        Some(Value::Number(n)) => n.to_string().len(),
        Some(Value::Bool(b)) => b.to_string().len(),
        Some(other) => serialized_len(other),
    }
}

/// Truncate an oversized body wholesale, otherwise shallow-redact sensitive
/// field names. Truncation takes precedence: the marker object is never
/// itself redacted.
pub fn sanitize_body(body: Option<&Value>) -> Option<Value> {
    let body = body?;
    if body.is_null() {
        return None;
    }

    let size = calculate_size(Some(body));
    if size > MAX_BODY_BYTES {
        return Some(truncation_marker("body exceeds maximum logged size", size));
    }

    match body {
        Value::Object(map) => {
            let redacted = map
                .iter()
                .map(|(k, v)| {
                    let lowered = k.to_ascii_lowercase();
                    if SENSITIVE_FIELDS.contains(&lowered.as_str()) {
                        (k.clone(), Value::String(REDACTED.to_string()))
                    } else {
                        (k.clone(), v.clone())
                    }
                })
                .collect();
            Some(Value::Object(redacted))
        }
        other => Some(other.clone()),
    }
}

/// Serialized size of a header map, as it would be logged.
pub fn headers_size(headers: &BTreeMap<String, String>) -> usize {
    serialized_len(headers)
}

/// Truncate an oversized header map wholesale, otherwise redact the known
/// sensitive header names (exact match).
pub fn sanitize_headers(headers: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    let size = headers_size(headers);
    if size > MAX_HEADER_BYTES {
        let mut marker = BTreeMap::new();
        marker.insert("truncated".to_string(), "true".to_string());
        marker.insert(
            "reason".to_string(),
            "headers exceed maximum logged size".to_string(),
        );
        marker.insert("original_size".to_string(), size.to_string());
        return marker;
    }

    headers
        .iter()
        .map(|(k, v)| {
            if SENSITIVE_HEADERS.contains(&k.as_str()) {
                (k.clone(), REDACTED.to_string())
            } else {
                (k.clone(), v.clone())
            }
        })
        .collect()
}
