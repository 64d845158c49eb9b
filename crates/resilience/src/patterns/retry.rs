//! Bounded retry with a fixed inter-attempt delay
//!
//! The policy is deliberately simple: `max_attempts` tries, the same `delay`
//! between each of them, no jitter and no exponential growth. The calling
//! thread is suspended while waiting, so it must only be used from threads
//! that own the work being retried (pool workers, blocked acquirers).

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{ConfigError, RetryError};

/// Upper bound accepted by [`RetryPolicy::validate`] for a single delay.
const MAX_DELAY_MS: u64 = 300_000;

/// Fixed-delay retry policy.
///
/// Defaults to 3 attempts spaced 1 second apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one
    pub max_attempts: u32,
    /// Delay between two consecutive attempts, in milliseconds
    pub delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay_ms: 1_000,
        }
    }
}

impl RetryPolicy {
    /// Create a policy with `max_attempts` tries separated by `delay`.
    #[must_use]
    pub const fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay_ms: delay.as_millis() as u64,
        }
    }

    /// A policy that tries exactly once.
    #[must_use]
    pub const fn once() -> Self {
        Self {
            max_attempts: 1,
            delay_ms: 0,
        }
    }

    /// Delay between attempts.
    #[must_use]
    pub const fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    /// Number of attempts `run` will make. A zero `max_attempts` still makes
    /// one attempt.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        if self.max_attempts == 0 {
            1
        } else {
            self.max_attempts
        }
    }

    /// Validate the policy.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::ZeroAttempts);
        }
        if self.delay_ms > MAX_DELAY_MS {
            return Err(ConfigError::DelayTooLong {
                delay_ms: self.delay_ms,
                max_ms: MAX_DELAY_MS,
            });
        }
        Ok(())
    }

    /// Run `op` until it succeeds or the attempts are exhausted, sleeping the
    /// current thread for [`delay`](Self::delay) between attempts.
    ///
    /// `op` receives the 1-based attempt number.
    pub fn run<T, E, F>(&self, op: F) -> Result<T, RetryError<E>>
    where
        E: fmt::Display,
        F: FnMut(u32) -> Result<T, E>,
    {
        self.run_with_sleep(op, std::thread::sleep)
    }

    /// Same as [`run`](Self::run) with a caller-supplied sleep function.
    ///
    /// `sleep` is invoked exactly `attempts - 1` times when every attempt
    /// fails, and never after the final attempt.
    pub fn run_with_sleep<T, E, F, S>(&self, mut op: F, mut sleep: S) -> Result<T, RetryError<E>>
    where
        E: fmt::Display,
        F: FnMut(u32) -> Result<T, E>,
        S: FnMut(Duration),
    {
        let max_attempts = self.attempts();
        let mut attempt = 1;
        loop {
            match op(attempt) {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempt, max_attempts, "retry succeeded");
                    }
                    return Ok(value);
                }
                Err(error) if attempt >= max_attempts => {
                    warn!(attempt, max_attempts, %error, "retry exhausted");
                    return Err(RetryError {
                        attempts: attempt,
                        last: error,
                    });
                }
                Err(error) => {
                    warn!(
                        attempt,
                        max_attempts,
                        delay_ms = self.delay_ms,
                        %error,
                        "attempt failed, retrying"
                    );
                    sleep(self.delay());
                    attempt += 1;
                }
            }
        }
    }
}
