use std::future::Future;
use std::time::Duration;

use crate::error::{AppError, AppResult};

/// Bounded, fixed-backoff retry used when establishing transport connections
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 10,
            backoff: Duration::from_secs(2),
        }
    }
}

/// Calls `connect` until it succeeds or the attempts are used up
///
/// Exhaustion is reported as `AppError::Transport`, which callers treat as fatal.
pub async fn connect_with_retry<T, F, Fut>(
    target: &str,
    policy: &RetryPolicy,
    connect: F,
) -> AppResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AppResult<T>>,
{
    tracing::info!(target_name = target, "Connecting");
    let connection = retry(target, policy, connect).await?;
    tracing::info!(target_name = target, "Connected");
    Ok(connection)
}

/// Same bounded retry for steady-state operations; quiet while they succeed
pub async fn retry<T, F, Fut>(target: &str, policy: &RetryPolicy, mut operation: F) -> AppResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AppResult<T>>,
{
    for attempt in 1..=policy.attempts {
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(target_name = target, attempt, "Recovered");
                }
                return Ok(value);
            }
            Err(e) => {
                tracing::warn!(target_name = target, attempt, error = %e, "Not ready yet");
                if attempt < policy.attempts {
                    tokio::time::sleep(policy.backoff).await;
                }
            }
        }
    }

    Err(AppError::Transport(format!(
        "{} unreachable after {} attempts",
        target, policy.attempts
    )))
}
