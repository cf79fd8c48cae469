use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

/// Log severity level. Unrecognized input always resolves to [`LogLevel::Info`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Parse a level from free-form text. Anything that is not one of the
    /// five known names maps to `Info`.
    pub fn parse(input: &str) -> Self {
        match input.trim().to_ascii_lowercase().as_str() {
            "error" => LogLevel::Error,
            "warn" => LogLevel::Warn,
            "debug" => LogLevel::Debug,
            "trace" => LogLevel::Trace,
            _ => LogLevel::Info,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }

    /// Numeric rank used for minimum-level filtering; higher is more severe.
    pub fn rank(&self) -> u8 {
        match self {
            LogLevel::Trace => 0,
            LogLevel::Debug => 1,
            LogLevel::Info => 2,
            LogLevel::Warn => 3,
            LogLevel::Error => 4,
        }
    }
}

/// Request-side fields captured for a log entry.
#[derive(Debug, Clone, Serialize, Default)]
pub struct RequestData {
    pub method: String,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
    pub query: BTreeMap<String, String>,
    pub params: BTreeMap<String, String>,
    pub ip: String,
    pub user_agent: String,
}

/// Response-side fields captured for a log entry.
#[derive(Debug, Clone, Serialize, Default)]
pub struct ResponseData {
    pub status_code: u16,
    pub headers: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
    /// Serialized size of the response body in bytes.
    pub size_bytes: u64,
}

/// Error details recorded when the wrapped handler fails.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorData {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    pub status_code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Performance fields. `duration_ms` is either a bare number of milliseconds
/// or a unit-suffixed string ("150ms", "2s", "500us"); the exporter
/// normalizes both forms to a canonical millisecond integer. `None` means
/// the duration was never measured, which is distinct from a measured zero.
#[derive(Debug, Clone, Serialize, Default)]
pub struct PerfData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<serde_json::Value>,
}

/// The canonical structured record produced once per request-handling cycle.
///
/// Fully assembled synchronously except for the performance duration, which
/// may be populated up to one scheduler tick after request completion.
/// Immutable after creation; handed to a [`crate::sink::LogSink`] and
/// discarded.
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    pub service_name: String,
    pub service_version: String,
    pub environment: String,
    /// Open string-keyed map of arbitrary values. At export time entries are
    /// partitioned into flat attributes (primitives, arrays of primitives)
    /// and navigable body content (nested objects).
    pub context: BTreeMap<String, serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request: Option<RequestData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<ResponseData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub performance: Option<PerfData>,
}

impl LogEntry {
    /// Create a minimal entry with the timestamp defaulted to now.
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        LogEntry {
            timestamp: Utc::now(),
            level,
            message: message.into(),
            service_name: String::new(),
            service_version: String::new(),
            environment: String::new(),
            context: BTreeMap::new(),
            trace_id: None,
            span_id: None,
            user_id: None,
            request_id: None,
            correlation_id: None,
            request: None,
            response: None,
            error: None,
            performance: None,
        }
    }
}
