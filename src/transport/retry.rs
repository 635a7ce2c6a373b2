//! Backoff retrier
//!
//! Quadratic backoff shared by the HTTP transport and stream reconnects.
//! Attempt `n` waits `min_backoff * n²`; a server `Retry-After` hint can
//! stretch the wait but never past `max_backoff`.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::RetrySettings;
use crate::utils::error::Temporary;

/// Quadratic backoff schedule: attempt `n` waits `min_backoff * n²`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    min_backoff: Duration,
    max_backoff: Duration,
}

impl RetryPolicy {
    pub const DEFAULT_MIN_BACKOFF: Duration = Duration::from_millis(100);
    pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(60);

    pub fn new(min_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            min_backoff,
            max_backoff,
        }
    }

    pub fn from_settings(settings: &RetrySettings) -> Self {
        Self::new(
            Duration::from_millis(settings.min_backoff_ms),
            Duration::from_millis(settings.max_backoff_ms),
        )
    }

    pub fn min_backoff(&self) -> Duration {
        self.min_backoff
    }

    pub fn max_backoff(&self) -> Duration {
        self.max_backoff
    }

    /// Delay after the `attempt`-th failure (1-based), uncapped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.min_backoff.saturating_mul(attempt.saturating_mul(attempt))
    }

    /// Delay after the `attempt`-th failure, capped at `max_backoff`.
    pub fn capped_backoff(&self, attempt: u32) -> Duration {
        self.backoff(attempt).min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MIN_BACKOFF, Self::DEFAULT_MAX_BACKOFF)
    }
}

/// Runs `operation` until it succeeds, fails permanently, or the retry
/// budget is spent.
///
/// Only errors whose `Temporary::is_temporary` is true are retried. The
/// last error is returned once more than `max_attempts` retries failed or
/// the next delay would exceed the policy's `max_backoff`. A larger
/// `Retry-After` hint carried by the error stretches the delay, up to
/// `max_backoff`.
pub async fn retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    max_attempts: u32,
    mut operation: F,
) -> Result<T, E>
where
    E: Temporary + std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt: u32 = 0;
    loop {
        let err = match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if !err.is_temporary() {
            return Err(err);
        }

        attempt += 1;
        let backoff = policy.backoff(attempt);
        if attempt > max_attempts || backoff > policy.max_backoff {
            warn!(attempt, error = %err, "giving up after retries");
            return Err(err);
        }

        let delay = match err.retry_after() {
            Some(hint) if hint > backoff => hint.min(policy.max_backoff),
            _ => backoff,
        };
        debug!(attempt, ?delay, error = %err, "retrying after temporary failure");
        tokio::time::sleep(delay).await;
    }
}
