//! Retry with exponential backoff for transient remote failures.
//!
//! Only a fixed set of HTTP statuses is considered transient (403, 429, 500,
//! 503). Everything else, and exhaustion of the attempt ceiling, is returned to
//! the caller immediately.

use std::future::Future;
use std::time::Duration;

use crate::config::RetryConfig;
use crate::contract::SourceError;

/// HTTP statuses that are retried.
pub const TRANSIENT_STATUSES: [u16; 4] = [403, 429, 500, 503];

/// Upper bound on a single backoff sleep.
pub const MAX_DELAY: Duration = Duration::from_secs(60);

/// Errors that can tell whether another attempt may succeed.
pub trait IsRetryable {
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for SourceError {
    fn is_retryable(&self) -> bool {
        match self {
            SourceError::Status { status, .. } => TRANSIENT_STATUSES.contains(status),
            SourceError::Transport(_) | SourceError::Decode(_) | SourceError::Auth(_) => false,
        }
    }
}

/// Run `operation` until it succeeds, fails permanently, or `config.max_attempts`
/// attempts have been made.
pub async fn with_retry<F, Fut, T, E>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 1;
    let mut delay = config.initial_delay();

    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(operation = operation_name, attempts = attempt, "Succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                tracing::warn!(
                    operation = operation_name,
                    error = %e,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "[RETRY] Transient API error, retrying"
                );
                tokio::time::sleep(delay).await;
                delay = next_delay(delay, config.multiplier);
                attempt += 1;
            }
            Err(e) => {
                let reason = if e.is_retryable() {
                    "Max retries reached"
                } else {
                    "Non-retryable error"
                };
                tracing::error!(operation = operation_name, error = %e, attempts = attempt, "[RETRY] {reason}");
                return Err(e);
            }
        }
    }
}

/// Grow `delay` by `multiplier`, capped at [`MAX_DELAY`]. A negative or
/// non-finite multiplier keeps the delay unchanged.
pub fn next_delay(delay: Duration, multiplier: f64) -> Duration {
    if !multiplier.is_finite() || multiplier < 0.0 {
        return delay.min(MAX_DELAY);
    }
    Duration::try_from_secs_f64(delay.as_secs_f64() * multiplier)
        .map_or(MAX_DELAY, |next| next.min(MAX_DELAY))
}
