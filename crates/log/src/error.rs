//! Logger initialization errors

use thiserror::Error;

/// Result alias for logger setup
pub type LogResult<T> = Result<T, LogError>;

/// Failure while building or installing the subscriber
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LogError {
    /// The level / directive string could not be parsed
    #[error("invalid log filter `{filter}`: {reason}")]
    Filter {
        /// Offending filter string
        filter: String,
        /// Parser message
        reason: String,
    },

    /// A global subscriber is already installed
    #[error("failed to install global subscriber: {0}")]
    Init(String),
}
