//! Timeout race for a single attempt
//!
//! The wrapped future and its timer share one cancellation point: when the
//! timer wins, the in-flight future is dropped, which aborts it.

use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;

/// Timeout error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Operation '{operation}' timed out after {duration:?}")]
pub struct TimeoutError {
    /// The operation that timed out
    pub operation: String,
    /// The timeout duration
    pub duration: Duration,
}

/// Execute a future with a timeout
pub async fn with_timeout<T>(
    duration: Duration,
    operation: impl Into<String>,
    future: impl Future<Output = T>,
) -> Result<T, TimeoutError> {
    let op = operation.into();
    timeout(duration, future).await.map_err(|_| {
        tracing::debug!(operation = %op, timeout_ms = duration.as_millis() as u64, "Attempt timed out");
        TimeoutError {
            operation: op,
            duration,
        }
    })
}

/// Timeout for one attempt of a retried call.
///
/// `remaining` counts down from `max_retries` to 0. The timeout is
/// `base * (max_retries - remaining + 1)`: the first attempt gets `base`,
/// and every retry gets one more multiple of it.
pub fn attempt_timeout(base: Duration, max_retries: u32, remaining: u32) -> Duration {
    let multiple = max_retries.saturating_sub(remaining).saturating_add(1);
    base.saturating_mul(multiple)
}
