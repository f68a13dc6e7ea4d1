use crate::peer::launch::LaunchError;
use std::future::Future;
use std::time::Duration;
use tracing::{error, warn};

/// Retry policy for sidecar launches.
///
/// Runs up to `max_attempts` launch attempts, sleeping `backoff_base * attempt`
/// between failures. Errors that are not retryable end the loop at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff_base: Duration,
}

impl RetryPolicy {
    /// Create a new policy. `max_attempts` is coerced to at least one.
    pub fn new(max_attempts: u32, backoff_base: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff_base,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay to wait after the given (1-based) failed attempt.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        self.backoff_base.saturating_mul(attempt)
    }
}

/// Drive `attempt_fn` until it succeeds, fails with a non-retryable error,
/// or the attempts are exhausted. `attempt_fn` receives the 1-based attempt number.
///
/// Dropping the returned future cancels the loop at its current await point,
/// including the backoff sleep, without starting another attempt.
pub async fn run_with_retries<T, F, Fut>(
    policy: &RetryPolicy,
    mut attempt_fn: F,
) -> Result<T, LaunchError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, LaunchError>>,
{
    let mut attempt = 1;
    loop {
        let err = match attempt_fn(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        if !err.is_retryable() {
            error!(attempt, error = %err, "sidecar launch failed, not retrying");
            return Err(err);
        }

        if attempt >= policy.max_attempts() {
            error!(
                attempt,
                error = %err,
                "giving up on starting sidecar after {attempt} failed attempts"
            );
            return Err(err);
        }

        let delay = policy.backoff_delay(attempt);
        warn!(
            attempt,
            max_attempts = policy.max_attempts(),
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "sidecar launch attempt failed, retrying"
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}
