//! Fixed-interval retry for rate-limited backend calls.

use foreman_abstraction::ModelError;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;
use tracing::warn;

use crate::config::RetrySettings;

/// Why a retried call gave up.
#[derive(Debug, Error)]
pub enum RetryError {
    /// Every attempt was rate limited.
    #[error("rate limited on all {attempts} attempts: {last}")]
    Exhausted {
        /// Attempts made.
        attempts: u32,
        /// Error from the final attempt.
        last: ModelError,
    },
    /// The call failed for a reason retrying cannot fix.
    #[error(transparent)]
    NotRetryable(ModelError),
}

/// Waits a fixed interval after each rate-limited attempt, up to a ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(RetrySettings::default())
    }
}

impl From<RetrySettings> for RetryPolicy {
    fn from(settings: RetrySettings) -> Self {
        Self::new(settings.max_attempts, settings.interval())
    }
}

impl RetryPolicy {
    /// A policy making at most `max_attempts` calls (at least one).
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        Self { max_attempts: max_attempts.max(1), interval }
    }

    /// Attempts per call.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Wait between attempts.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Runs `op` until it succeeds, fails with an error `is_rate_limited`
    /// rejects, or the attempt ceiling is reached. `on_rate_limit` is told
    /// the number of each rate-limited attempt before the wait.
    pub async fn execute<T, F, Fut>(
        &self,
        is_rate_limited: impl Fn(&ModelError) -> bool,
        mut on_rate_limit: impl FnMut(u32),
        mut op: F,
    ) -> Result<T, RetryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ModelError>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if !is_rate_limited(&err) => return Err(RetryError::NotRetryable(err)),
                Err(err) => {
                    if attempt >= self.max_attempts {
                        return Err(RetryError::Exhausted { attempts: attempt, last: err });
                    }
                    warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        wait_secs = self.interval.as_secs(),
                        error = %err,
                        "Rate limited, retrying after fixed interval"
                    );
                    on_rate_limit(attempt);
                    sleep(self.interval).await;
                }
            }
        }
    }
}
