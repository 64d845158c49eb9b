//! Construction parameters for both pool designs

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sluice_resilience::RetryPolicy;

use crate::error::{Error, Result};

/// Default backend port
pub const DEFAULT_PORT: u16 = 3306;
/// Default number of resources in a blocking pool
pub const DEFAULT_MAX_RESOURCES: usize = 5;
/// Default number of dispatcher workers
pub const DEFAULT_WORKERS: usize = 2;
/// Default health check period
pub const DEFAULT_HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(15);

/// Where and as whom to connect.
///
/// Copied into the pool at initialization and never mutated afterwards.
/// Only `max_resources` is checked by the pool; everything else is the
/// provider's business at `open` time.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    /// Backend host
    pub host: String,
    /// User / role
    pub principal: String,
    /// Password or token
    pub credential: String,
    /// Target database
    pub database: String,
    /// Backend port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Resources opened eagerly by a [`SharedPool`](crate::SharedPool)
    #[serde(default = "default_max_resources")]
    pub max_resources: usize,
}

const fn default_port() -> u16 {
    DEFAULT_PORT
}

const fn default_max_resources() -> usize {
    DEFAULT_MAX_RESOURCES
}

impl ConnectionInfo {
    /// Create connection info with the default port and pool size.
    pub fn new(
        host: impl Into<String>,
        principal: impl Into<String>,
        credential: impl Into<String>,
        database: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            principal: principal.into(),
            credential: credential.into(),
            database: database.into(),
            port: DEFAULT_PORT,
            max_resources: DEFAULT_MAX_RESOURCES,
        }
    }

    /// Set the port
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the blocking pool size
    #[must_use]
    pub fn with_max_resources(mut self, max_resources: usize) -> Self {
        self.max_resources = max_resources;
        self
    }

    /// `host:port`
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check pool sizing.
    pub fn validate(&self) -> Result<()> {
        if self.max_resources == 0 {
            return Err(Error::configuration("max_resources must be greater than 0"));
        }
        Ok(())
    }
}

impl fmt::Debug for ConnectionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionInfo")
            .field("host", &self.host)
            .field("principal", &self.principal)
            .field("credential", &"<redacted>")
            .field("database", &self.database)
            .field("port", &self.port)
            .field("max_resources", &self.max_resources)
            .finish()
    }
}

/// Dispatcher sizing and recovery settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Number of dedicated workers
    pub workers: usize,
    /// Policy used to (re)open a worker's resource
    pub retry: RetryPolicy,
    /// Period of the health monitor
    #[serde(rename = "health_check_interval_ms", with = "duration_ms")]
    pub health_check_interval: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            retry: RetryPolicy::default(),
            health_check_interval: DEFAULT_HEALTH_CHECK_INTERVAL,
        }
    }
}

impl DispatcherConfig {
    /// Config with `workers` workers and defaults elsewhere
    #[must_use]
    pub fn with_workers(workers: usize) -> Self {
        Self {
            workers,
            ..Self::default()
        }
    }

    /// Set the retry policy
    #[must_use]
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the health check period
    #[must_use]
    pub fn health_check_interval(mut self, interval: Duration) -> Self {
        self.health_check_interval = interval;
        self
    }

    /// Validate dispatcher configuration, returning an error if invalid.
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::configuration("workers must be greater than 0"));
        }
        if self.health_check_interval.is_zero() {
            return Err(Error::configuration(
                "health_check_interval must be greater than zero",
            ));
        }
        self.retry
            .validate()
            .map_err(|e| Error::configuration(format!("retry: {e}")))
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
