//! # Sluice Resilience
//!
//! Recovery primitives shared by both sluice pool designs.
//!
//! Currently this is a single pattern: [`RetryPolicy`], a bounded retry with a
//! fixed inter-attempt delay. It runs on the calling thread and suspends that
//! thread between attempts, which is exactly what a dedicated pool worker or a
//! blocked `acquire` caller wants.
//!
//! ```rust
//! use std::time::Duration;
//! use sluice_resilience::RetryPolicy;
//!
//! let policy = RetryPolicy::new(3, Duration::from_millis(1));
//! let mut calls = 0;
//! let value = policy
//!     .run(|_attempt| {
//!         calls += 1;
//!         if calls < 2 { Err("refused") } else { Ok(7) }
//!     })
//!     .unwrap();
//! assert_eq!(value, 7);
//! assert_eq!(calls, 2);
//! ```

#![deny(missing_docs)]

pub mod error;
pub mod patterns;

pub use error::{ConfigError, RetryError};
pub use patterns::retry::RetryPolicy;
