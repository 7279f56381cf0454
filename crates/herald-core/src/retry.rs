//! Bounded retry with multiplicative backoff.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::NotificationError;

/// Attempts, base delay and backoff multiplier, shared by channel sends and
/// infrastructure reconnects.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    #[serde(default = "default_attempts")]
    pub attempts: u32,

    /// Delay before the second attempt.
    #[serde(default = "default_delay", with = "humantime_serde")]
    pub delay: Duration,

    /// Factor applied to the delay after every failed attempt.
    #[serde(default = "default_backoff")]
    pub backoff: f64,
}

/// Longest pause between two attempts.
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(3600);

fn default_attempts() -> u32 {
    3
}

fn default_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_backoff() -> f64 {
    2.0
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: default_attempts(),
            delay: default_delay(),
            backoff: default_backoff(),
        }
    }
}

/// Final result of a retried operation and how many attempts it took.
#[derive(Debug)]
pub struct RetryOutcome<T, E> {
    pub result: Result<T, E>,
    pub attempts: u32,
}

impl RetryPolicy {
    pub fn new(attempts: u32, delay: Duration, backoff: f64) -> Self {
        Self {
            attempts,
            delay,
            backoff,
        }
    }

    /// A policy that tries exactly once.
    pub fn once() -> Self {
        Self::new(1, Duration::ZERO, 1.0)
    }

    pub fn validate(&self) -> Result<(), NotificationError> {
        if self.attempts == 0 {
            return Err(NotificationError::InvalidConfig(
                "retry attempts must be > 0".into(),
            ));
        }
        if !self.backoff.is_finite() || self.backoff < 1.0 {
            return Err(NotificationError::InvalidConfig(
                "retry backoff must be >= 1.0".into(),
            ));
        }
        Ok(())
    }

    /// Delay to wait after the given failed attempt (1-based), capped at
    /// [`MAX_RETRY_DELAY`].
    pub fn delay_after(&self, attempt: u32) -> Duration {
        if self.delay.is_zero() {
            return Duration::ZERO;
        }
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let factor = self.backoff.max(1.0).powi(exponent);
        Duration::try_from_secs_f64(self.delay.as_secs_f64() * factor)
            .map_or(MAX_RETRY_DELAY, |delay| delay.min(MAX_RETRY_DELAY))
    }

    /// Run `op` until it succeeds or the attempts are used up, sleeping
    /// between attempts. `on_error` observes every failed attempt.
    pub async fn run<T, E, F, Fut>(
        &self,
        mut op: F,
        mut on_error: impl FnMut(u32, &E),
    ) -> RetryOutcome<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let attempts = self.attempts.max(1);
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => {
                    return RetryOutcome {
                        result: Ok(value),
                        attempts: attempt,
                    };
                }
                Err(e) => {
                    on_error(attempt, &e);
                    if attempt >= attempts {
                        return RetryOutcome {
                            result: Err(e),
                            attempts: attempt,
                        };
                    }
                    tokio::time::sleep(self.delay_after(attempt)).await;
                    attempt += 1;
                }
            }
        }
    }
}
