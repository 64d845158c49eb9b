//! Testing utilities for pool consumers
//!
//! [`MockProvider`] is a scriptable in-memory backend. Clones share state, so
//! a test can hand one clone to a pool and keep another to inject faults and
//! read counters.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;

use crate::config::ConnectionInfo;
use crate::provider::ResourceProvider;

/// Queries starting with this prefix make [`MockProvider::execute`] panic.
pub const PANIC_QUERY: &str = "panic";

/// Errors produced by [`MockProvider`]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MockError {
    /// Scripted open failure
    #[error("connection refused by {host}")]
    Refused {
        /// Host from the connection info
        host: String,
    },
    /// Scripted query failure
    #[error("query rejected: {0}")]
    Rejected(String),
    /// Query on a killed resource
    #[error("resource {0} is disconnected")]
    Disconnected(u64),
}

#[derive(Debug)]
struct Flags {
    valid: AtomicBool,
    closed: AtomicBool,
}

/// Session handed out by [`MockProvider`]
#[derive(Debug)]
pub struct MockResource {
    id: u64,
    flags: Arc<Flags>,
}

impl MockResource {
    /// Sequential id, starting at 1
    pub fn id(&self) -> u64 {
        self.id
    }
}

#[derive(Debug, Default)]
struct MockState {
    next_id: AtomicU64,
    open_attempts: AtomicU64,
    opened: AtomicU64,
    closed: AtomicU64,
    executed: AtomicU64,
    fail_opens: AtomicU32,
    open_failing: AtomicBool,
    fail_executes: AtomicU32,
    latency: Mutex<Duration>,
    live: Mutex<HashMap<u64, Arc<Flags>>>,
}

/// Scriptable provider with `String` queries and `"{resource_id}:{query}"`
/// outputs.
#[derive(Debug, Clone, Default)]
pub struct MockProvider {
    state: Arc<MockState>,
}

impl MockProvider {
    /// Healthy provider, no latency
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` opens
    pub fn fail_next_opens(&self, n: u32) {
        self.state.fail_opens.store(n, Ordering::SeqCst);
    }

    /// Fail every open until switched off
    pub fn set_open_failing(&self, failing: bool) {
        self.state.open_failing.store(failing, Ordering::SeqCst);
    }

    /// Fail the next `n` queries
    pub fn fail_next_executes(&self, n: u32) {
        self.state.fail_executes.store(n, Ordering::SeqCst);
    }

    /// Sleep this long inside every query
    pub fn set_latency(&self, latency: Duration) {
        *self.state.latency.lock() = latency;
    }

    /// Invalidate the live resource `id`. Returns false if it is not open.
    pub fn kill(&self, id: u64) -> bool {
        self.state.live.lock().get(&id).is_some_and(|flags| {
            flags.valid.store(false, Ordering::SeqCst);
            true
        })
    }

    /// Invalidate every live resource
    pub fn kill_all(&self) {
        for flags in self.state.live.lock().values() {
            flags.valid.store(false, Ordering::SeqCst);
        }
    }

    /// Mark the live resource `id` closed behind the pool's back. It still
    /// reports valid. Returns false if it is not open.
    pub fn mark_closed(&self, id: u64) -> bool {
        self.state.live.lock().get(&id).is_some_and(|flags| {
            flags.closed.store(true, Ordering::SeqCst);
            true
        })
    }

    /// Ids of resources opened and not yet closed, sorted
    pub fn live_ids(&self) -> Vec<u64> {
        let mut ids: Vec<_> = self.state.live.lock().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Calls to `open`, successful or not
    pub fn open_attempts(&self) -> u64 {
        self.state.open_attempts.load(Ordering::SeqCst)
    }

    /// Successful opens
    pub fn opened(&self) -> u64 {
        self.state.opened.load(Ordering::SeqCst)
    }

    /// Calls to `close`
    pub fn closed(&self) -> u64 {
        self.state.closed.load(Ordering::SeqCst)
    }

    /// Calls to `execute`, probes included
    pub fn executed(&self) -> u64 {
        self.state.executed.load(Ordering::SeqCst)
    }

    fn take_scripted(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl ResourceProvider for MockProvider {
    type Resource = MockResource;
    type Query = String;
    type Output = String;
    type Error = MockError;

    fn open(&self, info: &ConnectionInfo) -> Result<MockResource, MockError> {
        self.state.open_attempts.fetch_add(1, Ordering::SeqCst);
        if self.state.open_failing.load(Ordering::SeqCst)
            || Self::take_scripted(&self.state.fail_opens)
        {
            return Err(MockError::Refused {
                host: info.host.clone(),
            });
        }
        let id = self.state.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let flags = Arc::new(Flags {
            valid: AtomicBool::new(true),
            closed: AtomicBool::new(false),
        });
        self.state.live.lock().insert(id, Arc::clone(&flags));
        self.state.opened.fetch_add(1, Ordering::SeqCst);
        Ok(MockResource { id, flags })
    }

    fn is_valid(&self, resource: &MockResource) -> bool {
        resource.flags.valid.load(Ordering::SeqCst)
    }

    fn is_closed(&self, resource: &MockResource) -> bool {
        resource.flags.closed.load(Ordering::SeqCst)
    }

    fn close(&self, resource: MockResource) {
        resource.flags.closed.store(true, Ordering::SeqCst);
        self.state.live.lock().remove(&resource.id);
        self.state.closed.fetch_add(1, Ordering::SeqCst);
    }

    fn execute(&self, resource: &mut MockResource, query: String) -> Result<String, MockError> {
        self.state.executed.fetch_add(1, Ordering::SeqCst);
        let latency = *self.state.latency.lock();
        if !latency.is_zero() {
            std::thread::sleep(latency);
        }
        assert!(
            !query.starts_with(PANIC_QUERY),
            "mock provider asked to panic on `{query}`"
        );
        if Self::take_scripted(&self.state.fail_executes) {
            return Err(MockError::Rejected(query));
        }
        if !resource.flags.valid.load(Ordering::SeqCst)
            || resource.flags.closed.load(Ordering::SeqCst)
        {
            return Err(MockError::Disconnected(resource.id));
        }
        Ok(format!("{}:{query}", resource.id))
    }

    fn probe_query(&self) -> String {
        "SELECT 1".to_string()
    }
}
