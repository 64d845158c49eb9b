//! Resilience pattern implementations

pub mod retry;
