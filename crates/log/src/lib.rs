//! # Sluice Log
//!
//! Subscriber bootstrap for everything built on the sluice pools.
//!
//! The pool crates only emit `tracing` events; which of them end up on the
//! terminal, and in what shape, is decided here.
//!
//! ```no_run
//! use sluice_log::Config;
//!
//! let _guard = sluice_log::init(Config::from_env()).expect("logger");
//! tracing::info!("pool starting");
//! ```

#![deny(missing_docs)]

mod builder;
pub mod config;
pub mod error;

pub use builder::{LoggerBuilder, LoggerGuard};
pub use config::{Config, DisplayConfig, Fields, Format};
pub use error::{LogError, LogResult};

// Re-export so callers do not need a direct tracing dependency for the basics
pub use tracing::{debug, error, info, trace, warn};

/// Install the global subscriber described by `config`.
///
/// Keep the returned guard alive for as long as logging should carry the
/// configured global fields.
pub fn init(config: Config) -> LogResult<LoggerGuard> {
    LoggerBuilder::from_config(config).build()
}

/// Install the default development subscriber.
pub fn init_default() -> LogResult<LoggerGuard> {
    init(Config::development())
}

/// Route events into the libtest output capture.
///
/// Safe to call from every test: only the first call in a process installs a
/// subscriber, later calls are no-ops. Honors `RUST_LOG`, defaulting to
/// `debug`.
pub fn init_test() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .with_thread_names(true)
        .compact()
        .try_init();
}
