//! Retry coordination for failed attempts.

use crate::cancel::CancellationToken;
use crate::error::Error;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

/// How `retries` is interpreted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RetryCounting {
    /// `retries` extra attempts after the first (`retries = 3` ⇒ 4 attempts).
    #[default]
    Additional,
    /// `retries` is the total attempt count, at least one.
    Total,
}

/// Resolved retry settings for one exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retries: u32,
    /// Fixed pause between attempts.
    pub delay: Duration,
    pub counting: RetryCounting,
}

impl RetryPolicy {
    /// Exactly one attempt.
    pub fn none() -> Self {
        Self {
            retries: 0,
            delay: Duration::ZERO,
            counting: RetryCounting::Additional,
        }
    }

    /// Upper bound on transport attempts.
    pub fn max_attempts(&self) -> u32 {
        match self.counting {
            RetryCounting::Additional => self.retries.saturating_add(1),
            RetryCounting::Total => self.retries.max(1),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

/// Failures that know whether another attempt could succeed.
pub(crate) trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for Error {
    fn is_retryable(&self) -> bool {
        Error::is_retryable(self)
    }
}

/// Run `attempt` until it succeeds, fails terminally, or the policy is spent.
///
/// Attempts are strictly sequential. The closure receives the 1-based
/// attempt number. Cancellation during the pause cuts it short; the next
/// attempt then observes the fired token and fails with an abort.
pub(crate) async fn execute<T, E, F, Fut>(
    policy: &RetryPolicy,
    token: &CancellationToken,
    mut attempt: F,
) -> Result<T, E>
where
    E: Retryable,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = policy.max_attempts();
    let mut n = 1;

    loop {
        match attempt(n).await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && n < max_attempts && !token.is_cancelled() => {
                debug!(
                    attempt = n,
                    max_attempts,
                    delay_ms = policy.delay.as_millis() as u64,
                    "attempt failed, retrying"
                );
                if !policy.delay.is_zero() {
                    tokio::select! {
                        _ = token.cancelled() => {}
                        _ = sleep(policy.delay) => {}
                    }
                }
                n += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
