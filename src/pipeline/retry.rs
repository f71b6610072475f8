//! Retry policy for stage tasks.
//!
//! Transient collaborator errors are retried with exponential backoff and a
//! per-attempt timeout; exhaustion promotes the last transient cause to a
//! fatal error, which the run's catch edge then records.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use crate::config::RetryConfig;
use crate::extract::TaskError;

/// Backoff delay before the next attempt (1-based): base * 2^(attempt-1),
/// capped at the configured maximum.
pub fn delay_for(config: &RetryConfig, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    let delay = config
        .base_delay_ms
        .saturating_mul(1u64 << exponent)
        .min(config.max_delay_ms);
    Duration::from_millis(delay)
}

/// Run a task with bounded retries and a per-attempt timeout.
///
/// Fatal errors are returned immediately; timeouts count as transient
/// failures.
pub async fn retry_task<T, F, Fut>(
    config: &RetryConfig,
    timeout: Duration,
    label: &str,
    mut op: F,
) -> Result<T, TaskError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, TaskError>>,
{
    let attempts = config.max_attempts.max(1);
    let mut last_cause = String::new();

    for attempt in 1..=attempts {
        match tokio::time::timeout(timeout, op()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(TaskError::Fatal(cause))) => return Err(TaskError::Fatal(cause)),
            Ok(Err(TaskError::Transient(cause))) => {
                debug!(task = label, attempt, cause = %cause, "transient task failure");
                last_cause = cause;
            }
            Err(_) => {
                debug!(task = label, attempt, "task attempt timed out");
                last_cause = format!("timed out after {}s", timeout.as_secs());
            }
        }
        if attempt < attempts {
            tokio::time::sleep(delay_for(config, attempt)).await;
        }
    }

    Err(TaskError::Fatal(format!(
        "{label} failed after {attempts} attempts: {last_cause}"
    )))
}
