//! Bounded retry with exponential backoff.
//!
//! Every retry loop in the service goes through this one combinator so the
//! bounds stay explicit: nothing here retries forever.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    /// Backoff multiplier per attempt. 1 keeps the interval fixed.
    pub multiplier: u32,
}

impl RetryPolicy {
    /// Callback-time credential persistence: 3 attempts, 1s backoff, doubling.
    pub const fn credential_persistence() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(1),
            multiplier: 2,
        }
    }

    /// Session establishment after an identity redirect: at most 10 polls at
    /// a fixed 200ms interval.
    pub const fn session_poll() -> Self {
        Self {
            max_attempts: 10,
            initial_backoff: Duration::from_millis(200),
            multiplier: 1,
        }
    }

    /// Wait before the next attempt, given the 1-based attempt that just failed.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        self.initial_backoff * self.multiplier.pow(attempt.saturating_sub(1))
    }
}

/// Run `op` until it succeeds or the policy's attempt budget is exhausted.
/// The last error is returned verbatim; intermediate failures are logged.
pub async fn retry<T, E, F, Fut>(policy: RetryPolicy, what: &str, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if attempt >= policy.max_attempts => {
                tracing::warn!("{}: giving up after {} attempts: {}", what, attempt, e);
                return Err(e);
            }
            Err(e) => {
                let wait = policy.backoff_for(attempt);
                tracing::warn!(
                    "{}: attempt {}/{} failed: {}; retrying in {:?}",
                    what,
                    attempt,
                    policy.max_attempts,
                    e,
                    wait
                );
                sleep(wait).await;
            }
        }
    }
}
