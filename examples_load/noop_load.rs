use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, Duration};

use request_log_sink::correlation::NoActiveSpan;
use request_log_sink::init::{build_interceptor, LoggerConfig};
use request_log_sink::interceptor::InterceptContext;
use request_log_sink::noop_sink::NoopSink;
use request_log_sink::span_tracker::SpanDurationTracker;

#[tokio::main]
async fn main() {
    let config = LoggerConfig::default();
    let tracker = Arc::new(SpanDurationTracker::new());
    let interceptor = build_interceptor(
        &config,
        Arc::new(NoopSink),
        tracker,
        Arc::new(NoActiveSpan),
    );

    let n: u64 = 10_000;
    let start = Instant::now();

    for i in 0..n {
        let ctx = InterceptContext::new(
            json!({"method": "GET", "url": format!("/load/{}", i), "headers": {}}),
            json!({"statusCode": 200}),
        );
        let _ = interceptor
            .intercept(ctx, Box::pin(async { Ok(json!({"ok": true})) }))
            .await;
    }

    let elapsed = start.elapsed();
    println!(
        "noop sink: {} intercepted requests in {:?} (~{:.0} req/s)",
        n,
        elapsed,
        n as f64 / elapsed.as_secs_f64()
    );

    // Give deferred emission tasks a little time to drain
    sleep(Duration::from_secs(1)).await;
}
