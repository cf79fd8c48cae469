use crate::record::LogEntry;
use async_trait::async_trait;
use std::error::Error;

/// Asynchronous destination for [`LogEntry`]s produced by the interceptor.
///
/// Implementations transport entries to a concrete backend (OTLP collector,
/// stdout, etc). The interceptor calls `send` from a background task after
/// the response has already been returned to the caller and never awaits it
/// on the request path.
#[async_trait]
pub trait LogSink: Send + Sync {
    /// Send a single log entry to the underlying backend.
    ///
    /// **Parameters**
    /// - `entry`: fully-populated [`LogEntry`] produced by the interceptor.
    ///
    /// **Returns**
    /// - `Ok(())` if the entry was accepted by the backend.
    /// - `Err(..)` if the backend failed (network error, serialization
    ///   error, HTTP status, etc.). The emission path treats failures as
    ///   fire-and-forget and discards them; no retry is performed here.
    async fn send(&self, entry: &LogEntry) -> Result<(), Box<dyn Error + Send + Sync>>;

    /// Flush any buffered entries, if the backend implements buffering.
    ///
    /// Default implementation is a no-op.
    async fn flush(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        Ok(())
    }
}
