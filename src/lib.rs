pub mod correlation;
pub mod extract;
pub mod interceptor;
pub mod otlp;
pub mod record;
pub mod sanitize;
pub mod sink;
pub mod span_tracker;

pub mod init;
pub mod noop_sink;
