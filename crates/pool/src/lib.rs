//! # Sluice Pool
//!
//! Two ways of sharing a handful of expensive backend sessions between many
//! concurrent callers:
//!
//! - [`SharedPool`]: a blocking pool. Callers [`acquire`](SharedPool::acquire)
//!   a [`Lease`], use the resource directly and give it back by dropping the
//!   lease. Resources are opened eagerly at initialization.
//! - [`Dispatcher`]: a set of dedicated [`Worker`] threads, each owning one
//!   lazily opened resource and a private FIFO queue. Callers
//!   [`submit`](Dispatcher::submit) a query with a completion callback and
//!   never block.
//!
//! Both designs validate resources before use, replace broken ones through
//! the same [`RetryPolicy`], and can be probed by a [`HealthMonitor`] without
//! stalling the task path.
//!
//! The backend itself is abstracted by [`ResourceProvider`].
//!
//! ```rust,ignore
//! let dispatcher = Dispatcher::new(provider, info, DispatcherConfig::default())?;
//! dispatcher.submit("SELECT 1".into(), |result| match result {
//!     Ok(rows) => println!("{rows:?}"),
//!     Err(e) => eprintln!("query failed: {e}"),
//! })?;
//! dispatcher.start_health_check()?;
//! ```

#![deny(missing_docs)]

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod health;
pub mod lease;
pub mod provider;
pub mod shared;
pub mod task;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod worker;

pub use config::{ConnectionInfo, DispatcherConfig};
pub use dispatcher::Dispatcher;
pub use error::{BoxError, Error, Result};
pub use health::{HealthMonitor, HealthProbe, HealthReport, HealthSink};
pub use lease::Lease;
pub use provider::{ResourceProvider, reconnect};
pub use shared::{PoolInfo, PoolStats, SharedPool};
pub use task::{Callback, Task};
pub use worker::{Worker, WorkerState};

pub use sluice_resilience::RetryPolicy;
