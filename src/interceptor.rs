//! Per-request orchestration: extract, correlate, invoke the downstream
//! handler, resolve the authoritative duration and emit one structured
//! entry per request.

use crate::correlation::{ActiveSpanProvider, CorrelationContext};
use crate::extract;
use crate::record::{ErrorData, LogEntry, LogLevel, PerfData, RequestData, ResponseData};
use crate::sanitize::{self, MAX_BODY_BYTES, MAX_HEADER_BYTES};
use crate::sink::LogSink;
use crate::span_tracker::SpanDurationTracker;
use chrono::Utc;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

/// Error surfaced by the wrapped handler. The interceptor records it and
/// re-raises it unchanged; it never swallows application errors.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct HandlerError {
    pub message: String,
    pub stack: Option<String>,
    pub status_code: Option<u16>,
    pub name: Option<String>,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        HandlerError {
            message: message.into(),
            stack: None,
            status_code: None,
            name: None,
        }
    }

    pub fn with_status(message: impl Into<String>, status_code: u16) -> Self {
        HandlerError {
            message: message.into(),
            stack: None,
            status_code: Some(status_code),
            name: None,
        }
    }
}

/// Deferred result of the downstream handler: the response body on success.
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Value, HandlerError>> + Send>>;

/// Captured view of the framework execution context: the raw request and
/// response objects as handed over by the framework collaborator.
///
/// A context with no retrievable request object is considered malformed and
/// bypasses instrumentation entirely.
#[derive(Debug, Clone, Default)]
pub struct InterceptContext {
    pub request: Option<Value>,
    pub response: Option<Value>,
}

impl InterceptContext {
    pub fn new(request: Value, response: Value) -> Self {
        InterceptContext {
            request: Some(request),
            response: Some(response),
        }
    }

    fn is_well_formed(&self) -> bool {
        self.request.is_some()
    }
}

/// Process-wide service identity stamped on every entry.
#[derive(Debug, Clone, Default)]
pub struct ServiceIdentity {
    pub name: String,
    pub version: String,
    pub environment: String,
}

/// Wraps downstream handler invocations and emits one [`LogEntry`] per
/// request, success or failure.
///
/// Instrumentation failure must never block application traffic: malformed
/// contexts pass straight through, oversized payloads get a degraded warn
/// entry, and all emission happens off the request path. Delivery errors
/// are reported on a local fallback channel and discarded.
pub struct LoggingInterceptor {
    sink: Arc<dyn LogSink>,
    tracker: Arc<SpanDurationTracker>,
    spans: Arc<dyn ActiveSpanProvider>,
    identity: ServiceIdentity,
    min_level: LogLevel,
}

impl LoggingInterceptor {
    pub fn new(
        sink: Arc<dyn LogSink>,
        tracker: Arc<SpanDurationTracker>,
        spans: Arc<dyn ActiveSpanProvider>,
        identity: ServiceIdentity,
        min_level: LogLevel,
    ) -> Self {
        LoggingInterceptor {
            sink,
            tracker,
            spans,
            identity,
            min_level,
        }
    }

    /// Run the downstream handler under instrumentation. The handler's
    /// result (or error) is always returned unchanged.
    pub async fn intercept(
        &self,
        ctx: InterceptContext,
        next: HandlerFuture,
    ) -> Result<Value, HandlerError> {
        if !ctx.is_well_formed() {
            return next.await;
        }

        let req = ctx.request.as_ref();
        let request = extract::request_data(req);
        let body_size = sanitize::calculate_size(request.body.as_ref());
        let header_size = sanitize::headers_size(&request.headers);

        // Circuit breaker: an oversized payload gets a single degraded warn
        // entry instead of participating in the full pipeline, which would
        // serialize the same oversized data a second time.
        if body_size > MAX_BODY_BYTES || header_size > MAX_HEADER_BYTES {
            self.emit_oversized(req, &request, body_size, header_size);
            return next.await;
        }

        let user_id = extract::user_id(req);
        let correlation_id = extract::correlation_id(req);
        let correlation = CorrelationContext::resolve(self.spans.as_ref(), user_id);
        let started = Instant::now();

        match next.await {
            Ok(response_body) => {
                self.finish(
                    ctx,
                    request,
                    correlation,
                    correlation_id,
                    started,
                    Ok(response_body.clone()),
                );
                Ok(response_body)
            }
            Err(err) => {
                self.finish(
                    ctx,
                    request,
                    correlation,
                    correlation_id,
                    started,
                    Err(err.clone()),
                );
                Err(err)
            }
        }
    }

    /// Degraded path for oversized payloads: one warn entry, body omitted,
    /// duration never measured.
    fn emit_oversized(
        &self,
        req: Option<&Value>,
        request: &RequestData,
        body_size: usize,
        header_size: usize,
    ) {
        let correlation =
            CorrelationContext::resolve(self.spans.as_ref(), extract::user_id(req));

        let mut context = BTreeMap::new();
        context.insert("body_size".to_string(), json!(body_size));
        context.insert("header_size".to_string(), json!(header_size));

        let entry = LogEntry {
            timestamp: Utc::now(),
            level: LogLevel::Warn,
            message: format!(
                "{} {} payload too large to log",
                request.method, request.url
            ),
            service_name: self.identity.name.clone(),
            service_version: self.identity.version.clone(),
            environment: self.identity.environment.clone(),
            context,
            trace_id: Some(correlation.trace_id),
            span_id: Some(correlation.span_id),
            user_id: correlation.user_id,
            request_id: Some(correlation.request_id),
            correlation_id: extract::correlation_id(req),
            request: Some(RequestData {
                body: None,
                headers: sanitize::sanitize_headers(&request.headers),
                ..request.clone()
            }),
            response: None,
            error: None,
            performance: None,
        };

        self.dispatch(entry);
    }

    /// Deferred completion: duration resolution and emission run as a task
    /// scheduled after the current turn, so span-closing callbacks get a
    /// chance to record into the tracker before lookup.
    fn finish(
        &self,
        ctx: InterceptContext,
        request: RequestData,
        correlation: CorrelationContext,
        correlation_id: Option<String>,
        started: Instant,
        outcome: Result<Value, HandlerError>,
    ) {
        let wall_ms = started.elapsed().as_secs_f64() * 1000.0;
        let sink = Arc::clone(&self.sink);
        let tracker = Arc::clone(&self.tracker);
        let spans = Arc::clone(&self.spans);
        let identity = self.identity.clone();
        let min_level = self.min_level;

        tokio::spawn(async move {
            tokio::task::yield_now().await;

            let duration_ms = resolve_duration(&tracker, spans.as_ref(), &correlation.span_id, wall_ms);
            let entry = build_entry(
                &ctx,
                request,
                correlation,
                correlation_id,
                duration_ms,
                outcome,
                &identity,
            );

            if entry.level.rank() < min_level.rank() {
                return;
            }
            if let Err(e) = sink.send(&entry).await {
                tracing::debug!(error = %e, "request log delivery failed");
                eprintln!("request log delivery failed: {}", e);
            }
        });
    }

    fn dispatch(&self, entry: LogEntry) {
        if entry.level.rank() < self.min_level.rank() {
            return;
        }
        let sink = Arc::clone(&self.sink);
        tokio::spawn(async move {
            if let Err(e) = sink.send(&entry).await {
                tracing::debug!(error = %e, "request log delivery failed");
                eprintln!("request log delivery failed: {}", e);
            }
        });
    }
}

/// Layered duration fallback. Span completion is asynchronous relative to
/// handler completion and the interceptor has no direct handle to "the"
/// request span, so lookups go from most to least specific:
/// currently-active span, then the span id captured at request entry, then
/// the largest tracked duration in the window, then the interceptor's own
/// wall-clock measurement.
fn resolve_duration(
    tracker: &SpanDurationTracker,
    spans: &dyn ActiveSpanProvider,
    captured_span_id: &str,
    wall_ms: f64,
) -> f64 {
    if let Some(active) = spans.active_span() {
        if let Some(d) = tracker.get_duration(&active.span_id) {
            return d;
        }
    }
    if let Some(d) = tracker.get_duration(captured_span_id) {
        return d;
    }
    if let Some(d) = tracker.max_duration() {
        return d;
    }
    wall_ms
}

fn build_entry(
    ctx: &InterceptContext,
    request: RequestData,
    correlation: CorrelationContext,
    correlation_id: Option<String>,
    duration_ms: f64,
    outcome: Result<Value, HandlerError>,
    identity: &ServiceIdentity,
) -> LogEntry {
    let sanitized_request = RequestData {
        body: sanitize::sanitize_body(request.body.as_ref()),
        headers: sanitize::sanitize_headers(&request.headers),
        ..request
    };

    let res = ctx.response.as_ref();
    let (level, message, response, error) = match outcome {
        Ok(response_body) => {
            let status = extract::status_code(res);
            let body = sanitize::sanitize_body(Some(&response_body));
            let size = sanitize::calculate_size(body.as_ref());
            let response = ResponseData {
                body,
                size_bytes: size as u64,
                headers: sanitize::sanitize_headers(&extract::headers(res)),
                ..extract::response_data(res, 0)
            };
            let message = format!(
                "{} {} {} ({:.1} ms)",
                sanitized_request.method, sanitized_request.url, status, duration_ms
            );
            (LogLevel::Info, message, Some(response), None)
        }
        Err(err) => {
            let status = err.status_code.unwrap_or(500);
            let message = format!(
                "{} {} failed with {}: {}",
                sanitized_request.method, sanitized_request.url, status, err.message
            );
            let error = ErrorData {
                message: err.message,
                stack: err.stack,
                status_code: status,
                name: err.name,
            };
            (LogLevel::Error, message, None, Some(error))
        }
    };

    LogEntry {
        timestamp: Utc::now(),
        level,
        message,
        service_name: identity.name.clone(),
        service_version: identity.version.clone(),
        environment: identity.environment.clone(),
        context: BTreeMap::new(),
        trace_id: Some(correlation.trace_id),
        span_id: Some(correlation.span_id),
        user_id: correlation.user_id,
        request_id: Some(correlation.request_id),
        correlation_id,
        request: Some(sanitized_request),
        response,
        error,
        performance: Some(PerfData {
            duration_ms: Some(json!(duration_ms)),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlation::NoActiveSpan;
    use crate::span_tracker::{SpanDurationTracker, SpanTiming};

    fn tracker_with(entries: &[(&str, (u64, u32), (u64, u32))]) -> SpanDurationTracker {
        let tracker = SpanDurationTracker::new();
        for (id, start, end) in entries {
            tracker.on_span_end(&SpanTiming {
                span_id: id.to_string(),
                start: Some(*start),
                end: Some(*end),
            });
        }
        tracker
    }

    #[test]
    fn duration_prefers_captured_span_id() {
        let tracker = tracker_with(&[
            ("other", (0, 0), (0, 3_000_000)),
            ("mine", (0, 0), (0, 7_000_000)),
        ]);
        let d = resolve_duration(&tracker, &NoActiveSpan, "mine", 999.0);
        assert!((d - 7.0).abs() < 1e-9);
    }

    #[test]
    fn duration_falls_back_to_max_tracked() {
        let tracker = tracker_with(&[
            ("a", (0, 0), (0, 3_000_000)),
            ("b", (0, 0), (0, 11_000_000)),
        ]);
        let d = resolve_duration(&tracker, &NoActiveSpan, "missing", 999.0);
        assert!((d - 11.0).abs() < 1e-9);
    }

    #[test]
    fn duration_falls_back_to_wall_clock_last() {
        let tracker = SpanDurationTracker::new();
        let d = resolve_duration(&tracker, &NoActiveSpan, "missing", 42.5);
        assert!((d - 42.5).abs() < 1e-9);
    }

    #[test]
    fn active_span_lookup_wins_over_everything() {
        use crate::correlation::{ActiveSpanProvider, SpanIds};

        struct Active;
        impl ActiveSpanProvider for Active {
            fn active_span(&self) -> Option<SpanIds> {
                Some(SpanIds {
                    trace_id: "t".repeat(32),
                    span_id: "active-span".to_string(),
                })
            }
        }

        let tracker = tracker_with(&[
            ("active-span", (0, 0), (0, 5_000_000)),
            ("captured", (0, 0), (0, 9_000_000)),
        ]);
        let d = resolve_duration(&tracker, &Active, "captured", 999.0);
        assert!((d - 5.0).abs() < 1e-9);
    }
}
