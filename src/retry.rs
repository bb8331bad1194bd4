//! Bounded retry and polling primitives
//!
//! Nothing in the installer waits without a bound: remote fetches use
//! [`RetryPolicy`] and readiness checks use [`poll_until`], which also
//! observes a [`CancellationToken`].

use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Retry policy for remote fetches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Cap on a single attempt, connect through body
    pub attempt_timeout: Duration,
    /// Delay before the second attempt; doubles afterwards
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub const MAX_ATTEMPTS: u32 = 6;
    pub const MAX_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(15);

    /// Create a policy, clamping to at most 6 attempts of at most 15s each
    pub fn new(max_attempts: u32, attempt_timeout: Duration) -> Self {
        Self {
            max_attempts: max_attempts.clamp(1, Self::MAX_ATTEMPTS),
            attempt_timeout: attempt_timeout
                .clamp(Duration::from_millis(1), Self::MAX_ATTEMPT_TIMEOUT),
            ..Self::default()
        }
    }

    /// Override the backoff delays
    pub fn with_delays(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_delay = initial;
        self.max_delay = max.max(initial);
        self
    }

    /// Delay after the given failed attempt (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.initial_delay.saturating_mul(factor).min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: Self::MAX_ATTEMPTS,
            attempt_timeout: Self::MAX_ATTEMPT_TIMEOUT,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
        }
    }
}

/// Stand-in deadline for timeouts too large to add to the current instant
const FAR_FUTURE: Duration = Duration::from_secs(60 * 60 * 24 * 365 * 30);

/// Why a poll stopped without the condition becoming true
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PollError {
    #[error("condition not met within {0:?}")]
    TimedOut(Duration),

    #[error("poll cancelled")]
    Cancelled,
}

/// Poll `check` every `interval` until it returns true
///
/// Returns the number of checks made. A check that is still running when the
/// deadline passes counts as a timeout.
pub async fn poll_until<F, Fut>(
    timeout: Duration,
    interval: Duration,
    cancel: &CancellationToken,
    mut check: F,
) -> Result<u32, PollError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let now = Instant::now();
    let deadline = now.checked_add(timeout).unwrap_or_else(|| now + FAR_FUTURE);
    let mut checks = 0;

    loop {
        checks += 1;
        let ready = tokio::select! {
            _ = cancel.cancelled() => return Err(PollError::Cancelled),
            result = tokio::time::timeout_at(deadline, check()) => {
                result.map_err(|_| PollError::TimedOut(timeout))?
            }
        };

        if ready {
            return Ok(checks);
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(PollError::TimedOut(timeout));
        }
        trace!("Condition not met after {} checks", checks);

        tokio::select! {
            _ = cancel.cancelled() => return Err(PollError::Cancelled),
            _ = tokio::time::sleep(interval.min(deadline - now)) => {}
        }
    }
}
