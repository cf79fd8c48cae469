use crate::correlation::{ActiveSpanProvider, NoActiveSpan};
use crate::interceptor::{LoggingInterceptor, ServiceIdentity};
use crate::otlp::{OtlpConfig, OtlpSink};
use crate::record::LogLevel;
use crate::sink::LogSink;
use crate::span_tracker::{DurationLayer, SpanDurationTracker};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::Registry;

/// Wire protocol used for log submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// JSON body over HTTP POST.
    HttpJson,
    /// Reserved; not implemented by this crate.
    Grpc,
}

/// Error type returned when building the logger from configuration.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("unsupported export protocol: {0:?}")]
    UnsupportedProtocol(Protocol),

    #[error("invalid endpoint url: {0}")]
    InvalidEndpoint(String),
}

/// Top-level logger configuration.
///
/// **Fields**
/// - `endpoint` / `protocol` / `timeout` / `headers`: OTLP submission
///   transport settings.
/// - `service_name` / `service_version` / `environment`: process-wide
///   identity stamped on every entry and exported as resource attributes.
/// - `min_level`: entries below this level are not emitted.
/// - `console_echo`: if `true`, a `tracing_subscriber::fmt` layer is added
///   so events are also printed to the console.
#[derive(Clone, Debug)]
pub struct LoggerConfig {
    pub endpoint: String,
    pub protocol: Protocol,
    pub timeout: Duration,
    pub headers: Vec<(String, String)>,
    pub service_name: String,
    pub service_version: String,
    pub environment: String,
    pub min_level: LogLevel,
    pub console_echo: bool,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:4318".to_string(),
            protocol: Protocol::HttpJson,
            timeout: Duration::from_secs(5),
            headers: Vec::new(),
            service_name: "unknown-service".to_string(),
            service_version: "0.0.0".to_string(),
            environment: "development".to_string(),
            min_level: LogLevel::Info,
            console_echo: true,
        }
    }
}

/// Build the OTLP sink described by the configuration.
pub fn make_sink(config: &LoggerConfig) -> Result<Arc<dyn LogSink>, ConfigError> {
    if config.protocol != Protocol::HttpJson {
        return Err(ConfigError::UnsupportedProtocol(config.protocol));
    }
    if !config.endpoint.starts_with("http://") && !config.endpoint.starts_with("https://") {
        return Err(ConfigError::InvalidEndpoint(config.endpoint.clone()));
    }

    Ok(Arc::new(OtlpSink::new(OtlpConfig {
        endpoint: config.endpoint.clone(),
        path: "/v1/logs".to_string(),
        headers: config.headers.clone(),
        timeout: config.timeout,
    })))
}

/// Assemble an interceptor against an explicit sink and span provider.
///
/// This is the composition point for tests and for applications that bring
/// their own transport or tracing integration.
pub fn build_interceptor(
    config: &LoggerConfig,
    sink: Arc<dyn LogSink>,
    tracker: Arc<SpanDurationTracker>,
    spans: Arc<dyn ActiveSpanProvider>,
) -> LoggingInterceptor {
    LoggingInterceptor::new(
        sink,
        tracker,
        spans,
        ServiceIdentity {
            name: config.service_name.clone(),
            version: config.service_version.clone(),
            environment: config.environment.clone(),
        },
        config.min_level,
    )
}

/// Initialize request logging from configuration.
///
/// **Effects**
///
/// Installs a [`Registry`] combined with a [`DurationLayer`] as the global
/// default subscriber so span completions feed the duration tracker, adds
/// the console `fmt` layer when `console_echo` is set, and returns the
/// ready-to-use interceptor together with the shared tracker handle.
pub fn init_logging(
    config: LoggerConfig,
) -> Result<(LoggingInterceptor, Arc<SpanDurationTracker>), ConfigError> {
    let sink = make_sink(&config)?;
    let tracker = Arc::new(SpanDurationTracker::new());

    if config.console_echo {
        let fmt_layer = tracing_subscriber::fmt::layer();
        let subscriber = Registry::default()
            .with(DurationLayer::new(Arc::clone(&tracker)))
            .with(fmt_layer);
        tracing::subscriber::set_global_default(subscriber).expect("set global subscriber");
    } else {
        let subscriber = Registry::default().with(DurationLayer::new(Arc::clone(&tracker)));
        tracing::subscriber::set_global_default(subscriber).expect("set global subscriber");
    }

    let interceptor = build_interceptor(
        &config,
        sink,
        Arc::clone(&tracker),
        Arc::new(NoActiveSpan),
    );
    Ok((interceptor, tracker))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unsupported_protocol() {
        let config = LoggerConfig {
            protocol: Protocol::Grpc,
            ..LoggerConfig::default()
        };
        assert!(matches!(
            make_sink(&config),
            Err(ConfigError::UnsupportedProtocol(Protocol::Grpc))
        ));
    }

    #[test]
    fn rejects_non_http_endpoint() {
        let config = LoggerConfig {
            endpoint: "collector:4318".to_string(),
            ..LoggerConfig::default()
        };
        assert!(matches!(make_sink(&config), Err(ConfigError::InvalidEndpoint(_))));
    }

    #[test]
    fn accepts_default_config() {
        assert!(make_sink(&LoggerConfig::default()).is_ok());
    }
}
