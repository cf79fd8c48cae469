use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{span, Subscriber};
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::registry::LookupSpan;

/// Maximum number of span durations retained before oldest-inserted entries
/// are evicted.
pub const DEFAULT_CAPACITY: usize = 100;

/// Start/end instants of a completed span, each as a seconds/nanoseconds
/// pair since the Unix epoch.
#[derive(Debug, Clone)]
pub struct SpanTiming {
    pub span_id: String,
    pub start: Option<(u64, u32)>,
    pub end: Option<(u64, u32)>,
}

/// Passive observer of span completions. Records wall-clock duration per
/// completed span into a bounded table keyed by span id, bridging the gap
/// between "the handler returned" and "the span describing its work has
/// closed and measured itself".
///
/// The table is append-only with FIFO eviction at capacity, read by many
/// concurrent interceptor instances and written only by span-completion
/// callbacks. Duration tracking is best-effort enrichment; nothing in here
/// may ever interrupt the tracing pipeline it observes.
pub struct SpanDurationTracker {
    durations: Mutex<VecDeque<(String, f64)>>,
    capacity: usize,
}

impl SpanDurationTracker {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        SpanDurationTracker {
            durations: Mutex::new(VecDeque::with_capacity(capacity.min(DEFAULT_CAPACITY))),
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<(String, f64)>> {
        // A poisoned lock only means another thread panicked mid-insert;
        // the table contents are still usable.
        self.durations
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record the duration of a completed span. Silently skips spans with a
    /// missing start or end instant. Evicts the oldest-inserted entry when
    /// the table is at capacity.
    pub fn on_span_end(&self, timing: &SpanTiming) {
        let (start, end) = match (timing.start, timing.end) {
            (Some(start), Some(end)) => (start, end),
            _ => return,
        };

        let start_nanos = start.0 as i128 * 1_000_000_000 + start.1 as i128;
        let end_nanos = end.0 as i128 * 1_000_000_000 + end.1 as i128;
        let duration_ms = (end_nanos - start_nanos) as f64 / 1e6;

        let mut table = self.lock();
        if table.len() >= self.capacity {
            table.pop_front();
        }
        table.push_back((timing.span_id.clone(), duration_ms));
    }

    /// Pure lookup by span id; most recent entry wins if an id was recorded
    /// more than once.
    pub fn get_duration(&self, span_id: &str) -> Option<f64> {
        self.lock()
            .iter()
            .rev()
            .find(|(id, _)| id == span_id)
            .map(|(_, d)| *d)
    }

    /// Largest tracked duration across all retained entries. Used as the
    /// last-resort lookup heuristic: the longest-lived span recorded in the
    /// current window is presumed to be the top-level request span. This can
    /// misattribute duration under concurrent overlapping requests and is
    /// only consulted after the more specific lookups have failed.
    pub fn max_duration(&self) -> Option<f64> {
        self.lock()
            .iter()
            .map(|(_, d)| *d)
            .fold(None, |max, d| match max {
                Some(m) if m >= d => Some(m),
                _ => Some(d),
            })
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Clear the entire table. Idempotent.
    pub fn shutdown(&self) {
        self.lock().clear();
    }
}

impl Default for SpanDurationTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Instant a span was opened, stamped into the span's extension storage.
struct SpanStart((u64, u32));

fn unix_now() -> Option<(u64, u32)> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()
        .map(|d| (d.as_secs(), d.subsec_nanos()))
}

/// `tracing_subscriber` layer feeding span completions into a
/// [`SpanDurationTracker`]. Stamps the open instant into the span's
/// extensions and reports the timing pair when the span closes.
pub struct DurationLayer {
    tracker: Arc<SpanDurationTracker>,
}

impl DurationLayer {
    pub fn new(tracker: Arc<SpanDurationTracker>) -> Self {
        DurationLayer { tracker }
    }
}

/// Hex form of a subscriber span id, matching the 16-char span id keyspace
/// used in correlation contexts.
pub fn format_span_id(id: &span::Id) -> String {
    format!("{:016x}", id.into_u64())
}

impl<S> Layer<S> for DurationLayer
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    fn on_new_span(&self, _attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        if let (Some(span), Some(now)) = (ctx.span(id), unix_now()) {
            span.extensions_mut().insert(SpanStart(now));
        }
    }

    fn on_close(&self, id: span::Id, ctx: Context<'_, S>) {
        let start = ctx
            .span(&id)
            .and_then(|span| span.extensions().get::<SpanStart>().map(|s| s.0));

        self.tracker.on_span_end(&SpanTiming {
            span_id: format_span_id(&id),
            start,
            end: unix_now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timing(id: &str, start: (u64, u32), end: (u64, u32)) -> SpanTiming {
        SpanTiming {
            span_id: id.to_string(),
            start: Some(start),
            end: Some(end),
        }
    }

    #[test]
    fn computes_duration_with_sub_millisecond_precision() {
        let tracker = SpanDurationTracker::new();
        // 1.25 ms = 1_250_000 ns
        tracker.on_span_end(&timing("a", (100, 0), (100, 1_250_000)));
        let d = tracker.get_duration("a").unwrap();
        assert!((d - 1.25).abs() < 1e-9);
    }

    #[test]
    fn crosses_second_boundaries() {
        let tracker = SpanDurationTracker::new();
        tracker.on_span_end(&timing("b", (10, 900_000_000), (12, 100_000_000)));
        let d = tracker.get_duration("b").unwrap();
        assert!((d - 1200.0).abs() < 1e-6);
    }

    #[test]
    fn skips_spans_with_missing_instants() {
        let tracker = SpanDurationTracker::new();
        tracker.on_span_end(&SpanTiming {
            span_id: "x".to_string(),
            start: None,
            end: Some((1, 0)),
        });
        tracker.on_span_end(&SpanTiming {
            span_id: "y".to_string(),
            start: Some((1, 0)),
            end: None,
        });
        assert!(tracker.is_empty());
        assert_eq!(tracker.get_duration("x"), None);
    }

    #[test]
    fn evicts_oldest_inserted_at_capacity() {
        let tracker = SpanDurationTracker::with_capacity(3);
        for i in 0..3 {
            tracker.on_span_end(&timing(&format!("s{}", i), (0, 0), (0, (i + 1) * 1_000_000)));
        }
        assert_eq!(tracker.len(), 3);

        tracker.on_span_end(&timing("s3", (0, 0), (0, 4_000_000)));
        assert_eq!(tracker.len(), 3);
        assert_eq!(tracker.get_duration("s0"), None);
        assert!(tracker.get_duration("s1").is_some());
        assert!(tracker.get_duration("s3").is_some());
    }

    #[test]
    fn max_duration_scans_all_entries() {
        let tracker = SpanDurationTracker::new();
        assert_eq!(tracker.max_duration(), None);
        tracker.on_span_end(&timing("a", (0, 0), (0, 2_000_000)));
        tracker.on_span_end(&timing("b", (0, 0), (0, 9_000_000)));
        tracker.on_span_end(&timing("c", (0, 0), (0, 5_000_000)));
        assert!((tracker.max_duration().unwrap() - 9.0).abs() < 1e-9);
    }

    #[test]
    fn shutdown_clears_and_is_idempotent() {
        let tracker = SpanDurationTracker::new();
        tracker.on_span_end(&timing("a", (0, 0), (1, 0)));
        tracker.shutdown();
        assert!(tracker.is_empty());
        tracker.shutdown();
        assert!(tracker.is_empty());
    }
}
