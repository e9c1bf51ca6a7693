//! Bounded retry with exponential backoff.
//!
//! Used wherever readiness of an external process has to be established by
//! probing: database connectivity after an engine start, and the PHP server
//! accepting connections after spawn.

use crate::error::Result;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one. Always at least 1.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff,
            max_backoff: max_backoff.max(initial_backoff),
        }
    }

    /// Database engines were observed taking 3-10 seconds to accept
    /// connections; this budget waits a little under half a minute.
    pub fn database_connect() -> Self {
        Self::new(10, Duration::from_millis(500), Duration::from_secs(4))
    }

    pub fn process_readiness() -> Self {
        Self::new(25, Duration::from_millis(100), Duration::from_millis(500))
    }

    /// Delay before retry number `attempt` (0-based: the wait after the first failure is `attempt == 0`).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(31)).unwrap_or(u32::MAX);
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }

    /// Worst-case time spent sleeping between attempts.
    pub fn total_budget(&self) -> Duration {
        (0..self.max_attempts.saturating_sub(1)).map(|a| self.backoff(a)).sum()
    }

    /// Run `op` until it succeeds or the attempt budget is spent.
    ///
    /// Returns the error from the final attempt when every attempt fails.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => {
                    if attempt > 0 {
                        tracing::debug!("{} succeeded after {} retries", label, attempt);
                    }
                    return Ok(value);
                }
                Err(e) if attempt + 1 >= self.max_attempts => {
                    tracing::debug!(
                        "{} failed after {} attempts: {}",
                        label,
                        self.max_attempts,
                        e
                    );
                    return Err(e);
                }
                Err(e) => {
                    let delay = self.backoff(attempt);
                    tracing::trace!(
                        "{} attempt {} failed ({}), retrying in {:?}",
                        label,
                        attempt + 1,
                        e,
                        delay
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::database_connect()
    }
}
