//! Error types for resilience operations

use thiserror::Error;

/// Returned by [`RetryPolicy::run`](crate::RetryPolicy::run) once every
/// attempt has failed.
///
/// Carries the error of the final attempt so the caller can surface the real
/// cause rather than a generic "gave up".
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("gave up after {attempts} attempt(s): {last}")]
pub struct RetryError<E: std::fmt::Display> {
    /// Number of attempts that were made
    pub attempts: u32,
    /// Error produced by the last attempt
    pub last: E,
}

impl<E: std::fmt::Display> RetryError<E> {
    /// Consume the error and return the last attempt's error.
    #[must_use]
    pub fn into_last(self) -> E {
        self.last
    }
}

/// Invalid retry configuration
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// `max_attempts` was zero
    #[error("max_attempts must be at least 1")]
    ZeroAttempts,

    /// The fixed delay is longer than the supported ceiling
    #[error("delay of {delay_ms}ms exceeds the {max_ms}ms ceiling")]
    DelayTooLong {
        /// Configured delay in milliseconds
        delay_ms: u64,
        /// Allowed maximum in milliseconds
        max_ms: u64,
    },
}
