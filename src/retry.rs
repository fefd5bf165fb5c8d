//! Retry policy for rate-limited upstream calls.
//!
//! Implements exponential backoff, preferring the server-supplied delay when one is given.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::FetchError;

/// Retry policy implementing exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, the first one included.
    pub max_attempts: u32,
    /// Backoff before the second attempt.
    pub initial_backoff: Duration,
    /// Cap for exponential growth.
    pub max_backoff: Duration,
    /// Multiplier applied to backoff after each retry.
    pub backoff_multiplier: f64,
}

impl RetryPolicy {
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    /// Backoff after the given failed attempt (1-based):
    /// `initial_backoff * multiplier^(attempt - 1)`, capped at `max_backoff`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1) as i32;
        let secs = self.initial_backoff.as_secs_f64() * self.backoff_multiplier.powi(exp);
        Duration::from_secs_f64(secs.min(self.max_backoff.as_secs_f64()))
    }

    /// Runs `op`, retrying only on [`FetchError::RateLimited`].
    ///
    /// Every other error is returned as-is on first sight. Once `max_attempts`
    /// is used up the rate limit becomes an [`FetchError::Upstream`].
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, FetchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Err(FetchError::RateLimited { retry_after }) => {
                    if attempt >= self.max_attempts {
                        return Err(FetchError::Upstream(format!(
                            "still rate limited after {} attempts",
                            attempt
                        )));
                    }
                    let wait = retry_after
                        .map(|d| d.min(self.max_backoff))
                        .unwrap_or_else(|| self.backoff(attempt));
                    warn!(attempt, wait_ms = wait.as_millis() as u64, "rate limited, backing off");
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}
