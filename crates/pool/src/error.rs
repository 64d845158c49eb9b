//! Error types for pool operations
use thiserror::Error;

/// Boxed provider error
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Result type for pool operations
pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong between a caller and a backend session
#[derive(Error, Debug)]
pub enum Error {
    /// Pool sizing is invalid
    #[error("configuration error: {message}")]
    Configuration {
        /// What was wrong
        message: String,
    },

    /// Opening (or reopening) a resource failed after every retry
    #[error("failed to connect to {host} after {attempts} attempt(s): {source}")]
    Connection {
        /// Target host
        host: String,
        /// Attempts made
        attempts: u32,
        /// Error of the last attempt
        #[source]
        source: BoxError,
    },

    /// The provider rejected a query on an otherwise usable resource
    #[error("query failed: {source}")]
    Query {
        /// Worker that ran the query, if any
        worker: Option<usize>,
        /// Provider error
        #[source]
        source: BoxError,
    },

    /// `acquire` was called before `initialize`
    #[error("pool is not initialized")]
    NotInitialized,

    /// The pool or dispatcher has been shut down
    #[error("pool is shut down")]
    ShutDown,

    /// No resource became available before the deadline
    #[error("timed out after {timeout_ms}ms waiting for a resource")]
    Timeout {
        /// How long the caller waited
        timeout_ms: u64,
    },

    /// The OS refused to start a pool thread
    #[error("failed to spawn thread '{name}': {source}")]
    Spawn {
        /// Thread name
        name: String,
        /// OS error
        #[source]
        source: std::io::Error,
    },

    /// The provider panicked while running a task
    #[error("worker {worker} panicked while executing a task")]
    TaskPanicked {
        /// Worker id
        worker: usize,
    },
}

impl Error {
    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a query error
    pub fn query<E>(worker: Option<usize>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Query {
            worker,
            source: Box::new(source),
        }
    }

    /// Whether trying again later can reasonably succeed
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Timeout { .. })
    }

    /// Whether this is a connection failure
    #[must_use]
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }
}
