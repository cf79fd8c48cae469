use rand::Rng;

/// Identifiers of a currently active trace span, as reported by the tracing
/// collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpanIds {
    pub trace_id: String,
    pub span_id: String,
}

/// Access to the tracing subsystem's notion of "the currently active span".
///
/// The crate consumes the tracing SDK only through this contract; span
/// creation and auto-instrumentation stay on the other side of it.
pub trait ActiveSpanProvider: Send + Sync {
    fn active_span(&self) -> Option<SpanIds>;
}

/// Provider used when no tracing subsystem is wired up; every request gets
/// synthesized identifiers instead.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoActiveSpan;

impl ActiveSpanProvider for NoActiveSpan {
    fn active_span(&self) -> Option<SpanIds> {
        None
    }
}

/// Per-request correlation identifiers, computed once at request entry and
/// never mutated mid-request.
///
/// `trace_id` and `span_id` are always populated: copied from the active
/// span when one exists, otherwise synthesized as random hex strings of the
/// correct length so downstream consumers can treat the fields uniformly.
#[derive(Debug, Clone)]
pub struct CorrelationContext {
    /// 32 lowercase hex characters.
    pub trace_id: String,
    /// 16 lowercase hex characters.
    pub span_id: String,
    /// Fresh per request, never reused.
    pub request_id: String,
    pub user_id: Option<String>,
}

impl CorrelationContext {
    pub fn resolve(provider: &dyn ActiveSpanProvider, user_id: Option<String>) -> Self {
        let (trace_id, span_id) = match provider.active_span() {
            Some(ids) => (ids.trace_id, ids.span_id),
            None => (random_hex(32), random_hex(16)),
        };

        CorrelationContext {
            trace_id,
            span_id,
            request_id: new_request_id(),
            user_id,
        }
    }
}

/// Random lowercase hex string of the given length.
pub fn random_hex(len: usize) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut rng = rand::thread_rng();
    (0..len).map(|_| HEX[rng.gen_range(0..16)] as char).collect()
}

/// Synthesize a request id from the current time plus a random suffix.
pub fn new_request_id() -> String {
    let millis = chrono::Utc::now().timestamp_millis();
    format!("req_{}_{}", millis, random_hex(8))
}
