//! OTLP-style wire encoding and HTTP submission of [`LogEntry`]s.
//!
//! Entries are encoded as a JSON `ExportLogsServiceRequest` lookalike:
//! resource-level attributes carry the service identity, each log record
//! carries a nanosecond timestamp, severity text/number, a tagged-union
//! body, flat key/value attributes and optional trace/span correlation
//! fields. Context entries are partitioned structurally: primitive scalars
//! and arrays of primitives become flat (filterable) attributes, nested
//! objects become part of the navigable body.

use crate::record::LogEntry;
use crate::sanitize::truncation_marker;
use crate::sink::LogSink;
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::error::Error;
use std::time::Duration;

/// Outbound payload size ceiling. Upstream sanitization should already have
/// bounded the entry; this recheck guarantees the wire payload is bounded
/// regardless.
pub const MAX_EXPORT_BYTES: usize = 1024 * 1024;

/// Tagged-union value encoding used for bodies and attributes. Each value
/// carries an explicit type tag; arrays recurse element-wise, objects
/// key-by-key.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum AnyValue {
    StringValue(String),
    IntValue(i64),
    DoubleValue(f64),
    BoolValue(bool),
    ArrayValue { values: Vec<AnyValue> },
    KvlistValue { values: Vec<KeyValue> },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeyValue {
    pub key: String,
    pub value: AnyValue,
}

impl KeyValue {
    pub fn new(key: impl Into<String>, value: AnyValue) -> Self {
        KeyValue { key: key.into(), value }
    }
}

/// Encode an arbitrary JSON value into the tagged-union wire form.
pub fn encode_value(value: &Value) -> AnyValue {
    match value {
        Value::Null => AnyValue::StringValue("null".to_string()),
        Value::Bool(b) => AnyValue::BoolValue(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => AnyValue::IntValue(i),
            None => AnyValue::DoubleValue(n.as_f64().unwrap_or(0.0)),
        },
        Value::String(s) => AnyValue::StringValue(s.clone()),
        Value::Array(items) => AnyValue::ArrayValue {
            values: items.iter().map(encode_value).collect(),
        },
        Value::Object(map) => AnyValue::KvlistValue {
            values: map
                .iter()
                .map(|(k, v)| KeyValue::new(k.clone(), encode_value(v)))
                .collect(),
        },
    }
}

/// Whether a context value qualifies as a flat attribute: a primitive
/// scalar, or an array whose elements are all primitive scalars.
pub fn is_primitive(value: &Value) -> bool {
    match value {
        Value::Object(_) => false,
        Value::Array(items) => items
            .iter()
            .all(|item| !matches!(item, Value::Object(_) | Value::Array(_))),
        _ => true,
    }
}

/// Split context entries into (flat attributes, nested body fields).
///
/// Flat attributes are typically indexed and filterable in observability
/// UIs but backends cap their count and size; nested structures go to the
/// body where they stay navigable without burning attribute cardinality.
pub fn partition_context(context: &BTreeMap<String, Value>) -> (Vec<KeyValue>, Vec<KeyValue>) {
    let mut attributes = Vec::new();
    let mut body_fields = Vec::new();
    for (key, value) in context {
        let encoded = KeyValue::new(key.clone(), encode_value(value));
        if is_primitive(value) {
            attributes.push(encoded);
        } else {
            body_fields.push(encoded);
        }
    }
    (attributes, body_fields)
}

/// Severity number per the common log-severity conventions. Unrecognized
/// levels map to the `info` code.
pub fn severity_number(level: &str) -> i32 {
    match level.trim().to_ascii_lowercase().as_str() {
        "trace" => 1,
        "debug" => 5,
        "info" => 9,
        "warn" => 13,
        "error" => 17,
        "fatal" => 21,
        _ => 9,
    }
}

fn parse_duration_str(input: &str) -> Option<i64> {
    let trimmed = input.trim();
    if let Some(num) = trimmed.strip_suffix("ms") {
        return num.trim().parse::<f64>().ok().map(|v| v.floor() as i64);
    }
    if let Some(num) = trimmed.strip_suffix("us") {
        return num.trim().parse::<f64>().ok().map(|v| (v / 1000.0).floor() as i64);
    }
    if let Some(num) = trimmed.strip_suffix('s') {
        return num.trim().parse::<f64>().ok().map(|v| (v * 1000.0).floor() as i64);
    }
    trimmed.parse::<f64>().ok().map(|v| v.floor() as i64)
}

/// Last-resort extraction of a "NNN ms" / "NNNms" figure from free text.
fn duration_from_message(message: &str) -> Option<i64> {
    let bytes = message.as_bytes();
    let mut search = 0;
    while let Some(found) = message[search..].find("ms") {
        let at = search + found;
        let mut start = at;
        if start > 0 && bytes[start - 1] == b' ' {
            start -= 1;
        }
        let digits_end = start;
        while start > 0 && (bytes[start - 1].is_ascii_digit() || bytes[start - 1] == b'.') {
            start -= 1;
        }
        if start < digits_end {
            if let Ok(v) = message[start..digits_end].parse::<f64>() {
                return Some(v.floor() as i64);
            }
        }
        search = at + 2;
    }
    None
}

/// Normalize a recorded duration to a canonical millisecond integer.
///
/// Accepts a bare number (assumed milliseconds) or a `ms`/`s`/`us` suffixed
/// string. When the dedicated field is absent, a `(NNN ms)`-style substring
/// of the message is tried as a last resort. Unparseable input yields
/// `None`; absence stays distinguishable from a measured zero.
pub fn normalize_duration(duration: Option<&Value>, message: &str) -> Option<i64> {
    match duration {
        Some(Value::Number(n)) => n.as_f64().map(|v| v.floor() as i64),
        Some(Value::String(s)) => parse_duration_str(s),
        Some(_) => None,
        None => duration_from_message(message),
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportLogsRequest {
    pub resource_logs: Vec<ResourceLogs>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceLogs {
    pub resource: Resource,
    pub scope_logs: Vec<ScopeLogs>,
}

#[derive(Debug, Serialize)]
pub struct Resource {
    pub attributes: Vec<KeyValue>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopeLogs {
    pub scope: Scope,
    pub log_records: Vec<LogRecordOut>,
}

#[derive(Debug, Serialize)]
pub struct Scope {
    pub name: String,
}

/// One wire-format log record.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogRecordOut {
    pub time_unix_nano: String,
    pub severity_text: String,
    pub severity_number: i32,
    pub body: AnyValue,
    pub attributes: Vec<KeyValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_flags: Option<u32>,
}

fn push_str_attr(attrs: &mut Vec<KeyValue>, key: &str, value: &Option<String>) {
    if let Some(v) = value {
        attrs.push(KeyValue::new(key, AnyValue::StringValue(v.clone())));
    }
}

/// Encode a single entry into a wire log record.
pub fn encode_record(entry: &LogEntry) -> LogRecordOut {
    let serialized_size = serde_json::to_vec(entry).map(|v| v.len()).unwrap_or(0);

    let mut attributes: Vec<KeyValue> = Vec::new();
    let mut body_fields: Vec<KeyValue> = Vec::new();

    if serialized_size > MAX_EXPORT_BYTES {
        let marker = truncation_marker("log entry exceeds maximum export size", serialized_size);
        body_fields.push(KeyValue::new("message", encode_value(&marker)));
    } else {
        body_fields.push(KeyValue::new(
            "message",
            AnyValue::StringValue(entry.message.clone()),
        ));

        let (flat, nested) = partition_context(&entry.context);
        attributes.extend(flat);
        body_fields.extend(nested);

        push_str_attr(&mut attributes, "request_id", &entry.request_id);
        push_str_attr(&mut attributes, "user_id", &entry.user_id);
        push_str_attr(&mut attributes, "correlation_id", &entry.correlation_id);

        if let Some(req) = &entry.request {
            attributes.push(KeyValue::new(
                "http.method",
                AnyValue::StringValue(req.method.clone()),
            ));
            attributes.push(KeyValue::new(
                "http.url",
                AnyValue::StringValue(req.url.clone()),
            ));
            attributes.push(KeyValue::new(
                "http.client_ip",
                AnyValue::StringValue(req.ip.clone()),
            ));
            if let Ok(encoded) = serde_json::to_value(req) {
                body_fields.push(KeyValue::new("request", encode_value(&encoded)));
            }
        }
        if let Some(res) = &entry.response {
            attributes.push(KeyValue::new(
                "http.status_code",
                AnyValue::IntValue(res.status_code as i64),
            ));
            if let Ok(encoded) = serde_json::to_value(res) {
                body_fields.push(KeyValue::new("response", encode_value(&encoded)));
            }
        }
        if let Some(err) = &entry.error {
            attributes.push(KeyValue::new(
                "error.message",
                AnyValue::StringValue(err.message.clone()),
            ));
            if let Ok(encoded) = serde_json::to_value(err) {
                body_fields.push(KeyValue::new("error", encode_value(&encoded)));
            }
        }

        let duration = normalize_duration(
            entry
                .performance
                .as_ref()
                .and_then(|p| p.duration_ms.as_ref()),
            &entry.message,
        );
        if let Some(ms) = duration {
            attributes.push(KeyValue::new("duration_ms", AnyValue::IntValue(ms)));
        }
    }

    LogRecordOut {
        time_unix_nano: entry
            .timestamp
            .timestamp_nanos_opt()
            .unwrap_or_default()
            .to_string(),
        severity_text: entry.level.as_str().to_string(),
        severity_number: severity_number(entry.level.as_str()),
        body: AnyValue::KvlistValue { values: body_fields },
        attributes,
        trace_id: entry.trace_id.clone(),
        span_id: entry.span_id.clone(),
        trace_flags: entry.trace_id.as_ref().map(|_| 1),
    }
}

/// Configuration for [`OtlpSink`].
#[derive(Clone, Debug)]
pub struct OtlpConfig {
    /// Base URL without path, e.g. "http://127.0.0.1:4318".
    pub endpoint: String,
    /// Submission path, defaults to "/v1/logs".
    pub path: String,
    /// Custom headers added to every submission (auth tokens etc.).
    pub headers: Vec<(String, String)>,
    /// Per-request timeout after which the submission is abandoned.
    pub timeout: Duration,
}

impl Default for OtlpConfig {
    fn default() -> Self {
        OtlpConfig {
            endpoint: "http://127.0.0.1:4318".to_string(),
            path: "/v1/logs".to_string(),
            headers: Vec::new(),
            timeout: Duration::from_secs(5),
        }
    }
}

/// OTLP-style implementation of [`LogSink`] over HTTP JSON.
///
/// One submission per entry; no retry is performed here (that is the job of
/// an intermediary collector, if desired).
#[derive(Clone)]
pub struct OtlpSink {
    client: Client,
    config: OtlpConfig,
}

impl OtlpSink {
    pub fn new(config: OtlpConfig) -> Self {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client, config }
    }

    fn endpoint(&self) -> String {
        let base = self.config.endpoint.trim_end_matches('/');
        let path = if self.config.path.starts_with('/') {
            self.config.path.clone()
        } else {
            format!("/{}", self.config.path)
        };
        format!("{}{}", base, path)
    }

    fn build_payload(&self, entry: &LogEntry) -> ExportLogsRequest {
        let resource_attributes = vec![
            KeyValue::new(
                "service.name",
                AnyValue::StringValue(entry.service_name.clone()),
            ),
            KeyValue::new(
                "service.version",
                AnyValue::StringValue(entry.service_version.clone()),
            ),
            KeyValue::new(
                "deployment.environment",
                AnyValue::StringValue(entry.environment.clone()),
            ),
        ];

        ExportLogsRequest {
            resource_logs: vec![ResourceLogs {
                resource: Resource {
                    attributes: resource_attributes,
                },
                scope_logs: vec![ScopeLogs {
                    scope: Scope {
                        name: env!("CARGO_PKG_NAME").to_string(),
                    },
                    log_records: vec![encode_record(entry)],
                }],
            }],
        }
    }
}

#[async_trait]
impl LogSink for OtlpSink {
    async fn send(&self, entry: &LogEntry) -> Result<(), Box<dyn Error + Send + Sync>> {
        let payload = self.build_payload(entry);
        let mut request = self.client.post(self.endpoint()).json(&payload);
        for (name, value) in &self.config.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let resp = request.send().await?;
        if resp.status().is_success() {
            Ok(())
        } else {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_else(|_| "<no body>".to_string());
            Err(format!("OTLP log submission failed with status {}: {}", status, text).into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::LogLevel;
    use serde_json::json;

    #[test]
    fn severity_numbers_follow_convention() {
        assert_eq!(severity_number("trace"), 1);
        assert_eq!(severity_number("debug"), 5);
        assert_eq!(severity_number("info"), 9);
        assert_eq!(severity_number("warn"), 13);
        assert_eq!(severity_number("error"), 17);
        assert_eq!(severity_number("fatal"), 21);
        assert_eq!(severity_number("weird"), 9);
        assert_eq!(severity_number("warning"), 9);
    }

    #[test]
    fn duration_normalization_table() {
        assert_eq!(normalize_duration(Some(&json!("150ms")), ""), Some(150));
        assert_eq!(normalize_duration(Some(&json!("2s")), ""), Some(2000));
        assert_eq!(normalize_duration(Some(&json!("500us")), ""), Some(0));
        assert_eq!(normalize_duration(Some(&json!(150)), ""), Some(150));
        assert_eq!(normalize_duration(Some(&json!(150.9)), ""), Some(150));
        assert_eq!(normalize_duration(Some(&json!("banana")), ""), None);
        assert_eq!(normalize_duration(None, "no numbers here"), None);
    }

    #[test]
    fn duration_parsed_from_message_as_last_resort() {
        assert_eq!(normalize_duration(None, "GET /users 200 (42 ms)"), Some(42));
        assert_eq!(normalize_duration(None, "completed in 17.8ms"), Some(17));
        assert_eq!(normalize_duration(None, "msg without duration"), None);
    }

    #[test]
    fn tagged_union_json_shapes() {
        let v = encode_value(&json!({"a": 1, "b": [true, "x"], "f": 1.5}));
        let out = serde_json::to_value(&v).unwrap();
        assert_eq!(
            out,
            json!({"kvlistValue": {"values": [
                {"key": "a", "value": {"intValue": 1}},
                {"key": "b", "value": {"arrayValue": {"values": [
                    {"boolValue": true},
                    {"stringValue": "x"}
                ]}}},
                {"key": "f", "value": {"doubleValue": 1.5}}
            ]}})
        );
    }

    #[test]
    fn context_partition_routes_primitives_to_attributes() {
        let mut entry = LogEntry::new(LogLevel::Info, "hello");
        entry.context.insert("a".into(), json!(1));
        entry.context.insert("b".into(), json!("s"));
        entry.context.insert("c".into(), json!([1, 2]));
        entry.context.insert("d".into(), json!({"nested": true}));

        let record = encode_record(&entry);
        let attr_keys: Vec<&str> = record.attributes.iter().map(|kv| kv.key.as_str()).collect();
        assert!(attr_keys.contains(&"a"));
        assert!(attr_keys.contains(&"b"));
        assert!(attr_keys.contains(&"c"));
        assert!(!attr_keys.contains(&"d"));

        match &record.body {
            AnyValue::KvlistValue { values } => {
                let body_keys: Vec<&str> = values.iter().map(|kv| kv.key.as_str()).collect();
                assert!(body_keys.contains(&"message"));
                assert!(body_keys.contains(&"d"));
                assert!(!body_keys.contains(&"a"));
            }
            other => panic!("body must be a kvlist, got {:?}", other),
        }
    }

    #[test]
    fn arrays_containing_objects_go_to_the_body() {
        assert!(is_primitive(&json!([1, "a", true])));
        assert!(!is_primitive(&json!([{"k": 1}])));
        assert!(!is_primitive(&json!([[1]])));
        assert!(!is_primitive(&json!({"k": 1})));
    }

    #[test]
    fn correlation_fields_propagate() {
        let mut entry = LogEntry::new(LogLevel::Error, "boom");
        entry.trace_id = Some("0af7651916cd43dd8448eb211c80319c".into());
        entry.span_id = Some("b7ad6b7169203331".into());

        let record = encode_record(&entry);
        assert_eq!(record.severity_number, 17);
        assert_eq!(record.trace_id.as_deref(), Some("0af7651916cd43dd8448eb211c80319c"));
        assert_eq!(record.span_id.as_deref(), Some("b7ad6b7169203331"));
        assert_eq!(record.trace_flags, Some(1));
    }

    #[test]
    fn oversized_entries_are_replaced_with_a_marker() {
        let mut entry = LogEntry::new(LogLevel::Info, "big");
        entry
            .context
            .insert("blob".into(), json!("x".repeat(MAX_EXPORT_BYTES + 1)));

        let record = encode_record(&entry);
        assert!(record.attributes.is_empty());
        match &record.body {
            AnyValue::KvlistValue { values } => {
                assert_eq!(values.len(), 1);
                let rendered = serde_json::to_string(&values[0]).unwrap();
                assert!(rendered.contains("truncated"));
                assert!(!rendered.contains(&"x".repeat(64)));
            }
            other => panic!("body must be a kvlist, got {:?}", other),
        }
    }

    #[test]
    fn endpoint_joins_base_and_path() {
        let sink = OtlpSink::new(OtlpConfig {
            endpoint: "http://collector:4318/".into(),
            path: "v1/logs".into(),
            ..OtlpConfig::default()
        });
        assert_eq!(sink.endpoint(), "http://collector:4318/v1/logs");
    }
}
