use serde_json::json;
use tokio::time::{sleep, Duration};

use request_log_sink::init::{init_logging, LoggerConfig};
use request_log_sink::interceptor::InterceptContext;
use request_log_sink::record::LogLevel;

#[tokio::main]
async fn main() {
    let config = LoggerConfig {
        endpoint: "http://127.0.0.1:4318".to_string(),
        service_name: "example-api".to_string(),
        service_version: "1.2.3".to_string(),
        environment: "staging".to_string(),
        min_level: LogLevel::Debug,
        ..LoggerConfig::default()
    };

    let (interceptor, _tracker) = init_logging(config).expect("init logging");

    let ctx = InterceptContext::new(
        json!({
            "method": "GET",
            "url": "/api/users/42",
            "headers": {"user-agent": "example/1.0", "authorization": "Bearer secret"},
            "ip": "203.0.113.7",
        }),
        json!({"statusCode": 200}),
    );

    let result = interceptor
        .intercept(
            ctx,
            Box::pin(async {
                sleep(Duration::from_millis(25)).await;
                Ok(json!({"id": 42, "name": "Ada"}))
            }),
        )
        .await;

    println!("handler result: {:?}", result);

    // Give the deferred emission task time to deliver the entry
    sleep(Duration::from_secs(1)).await;
}
