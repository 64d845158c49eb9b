//! Blocking shared pool.
//!
//! Callers contend on one mutex and one condvar guarding the free set.
//! Apart from the eager opens in `initialize`, provider calls run outside the
//! lock. While a caller is opening a replacement the slot stays counted as
//! loaned, so `free + loaned + vacant == capacity` holds at every unlock.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use sluice_resilience::RetryPolicy;
use tracing::{debug, error, info, warn};

use crate::config::ConnectionInfo;
use crate::error::{Error, Result};
use crate::lease::Lease;
use crate::provider::{ResourceProvider, is_usable, reconnect};

// ---------------------------------------------------------------------------
// Snapshots
// ---------------------------------------------------------------------------

/// Point-in-time view of the pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolInfo {
    /// Backend host
    pub host: String,
    /// User / role
    pub principal: String,
    /// Target database
    pub database: String,
    /// Backend port
    pub port: u16,
    /// Configured size
    pub capacity: usize,
    /// Resources in the free set
    pub available: usize,
    /// Resources on loan
    pub in_use: usize,
    /// Slots whose resource could not be opened
    pub vacant: usize,
}

impl fmt::Display for PoolInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{}:{}/{} [{} available, {} in use, {} vacant, capacity {}]",
            self.principal,
            self.host,
            self.port,
            self.database,
            self.available,
            self.in_use,
            self.vacant,
            self.capacity
        )
    }
}

/// Pool statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Resources ever opened
    pub created: u64,
    /// Resources ever closed by the pool
    pub destroyed: u64,
    /// Successful acquisitions
    pub acquisitions: u64,
    /// Calls to release
    pub releases: u64,
    /// Broken resources swapped for fresh ones
    pub replacements: u64,
}

// ---------------------------------------------------------------------------
// Pool internals
// ---------------------------------------------------------------------------

struct State<R> {
    free: VecDeque<R>,
    loaned: usize,
    vacant: usize,
    capacity: usize,
    initialized: bool,
    closed: bool,
    info: Option<Arc<ConnectionInfo>>,
    stats: PoolStats,
}

/// What `acquire` took out of the state
enum Slot<R> {
    Filled(R),
    Vacant,
}

struct Inner<P: ResourceProvider> {
    provider: P,
    retry: RetryPolicy,
    state: Mutex<State<P::Resource>>,
    available: Condvar,
}

impl<P: ResourceProvider> Drop for Inner<P> {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        let leftover: Vec<_> = state.free.drain(..).collect();
        if !leftover.is_empty() {
            debug!(count = leftover.len(), "closing idle resources on drop");
        }
        for resource in leftover {
            self.provider.close(resource);
        }
    }
}

/// Fixed-size pool of resources shared by blocking callers.
///
/// Cheap to clone; clones share the same free set. Construct one per backend
/// and pass it to whoever needs it.
pub struct SharedPool<P: ResourceProvider> {
    inner: Arc<Inner<P>>,
}

impl<P: ResourceProvider> Clone for SharedPool<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P: ResourceProvider> fmt::Debug for SharedPool<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("SharedPool")
            .field("capacity", &state.capacity)
            .field("available", &state.free.len())
            .field("in_use", &state.loaned)
            .field("vacant", &state.vacant)
            .field("closed", &state.closed)
            .finish_non_exhaustive()
    }
}

impl<P: ResourceProvider> SharedPool<P> {
    /// Create an uninitialized pool with the default retry policy.
    pub fn new(provider: P) -> Self {
        Self::with_retry(provider, RetryPolicy::default())
    }

    /// Create an uninitialized pool that reconnects through `retry`.
    pub fn with_retry(provider: P, retry: RetryPolicy) -> Self {
        Self {
            inner: Arc::new(Inner {
                provider,
                retry,
                state: Mutex::new(State {
                    free: VecDeque::new(),
                    loaned: 0,
                    vacant: 0,
                    capacity: 0,
                    initialized: false,
                    closed: false,
                    info: None,
                    stats: PoolStats::default(),
                }),
                available: Condvar::new(),
            }),
        }
    }

    /// The provider backing this pool
    pub fn provider(&self) -> &P {
        &self.inner.provider
    }

    /// Open `info.max_resources` resources and start serving.
    ///
    /// Returns `Ok(false)` without doing anything if the pool was already
    /// initialized. Individual open failures are logged and leave vacant
    /// slots that later acquirers refill.
    pub fn initialize(&self, info: ConnectionInfo) -> Result<bool> {
        let mut state = self.inner.state.lock();
        if state.initialized {
            debug!("pool already initialized");
            return Ok(false);
        }
        if state.closed {
            return Err(Error::ShutDown);
        }
        info.validate()?;

        // Held across the opens so concurrent initializers wait for us.
        let capacity = info.max_resources;
        for index in 0..capacity {
            match self.inner.provider.open(&info) {
                Ok(resource) => {
                    state.free.push_back(resource);
                    state.stats.created += 1;
                }
                Err(e) => {
                    error!(host = %info.host, slot = index, error = %e, "failed to open resource");
                    state.vacant += 1;
                }
            }
        }

        info!(
            host = %info.host,
            database = %info.database,
            opened = state.free.len(),
            capacity,
            "pool initialized"
        );
        state.capacity = capacity;
        state.info = Some(Arc::new(info));
        state.initialized = true;
        drop(state);
        self.inner.available.notify_all();
        Ok(true)
    }

    /// Block until a resource is available.
    ///
    /// A broken resource at the front of the free set is closed and replaced
    /// transparently; only a failed replacement surfaces, as
    /// [`Error::Connection`].
    pub fn acquire(&self) -> Result<Lease<P>> {
        self.acquire_inner(None)
    }

    /// Like [`acquire`](Self::acquire) but gives up after `timeout`.
    ///
    /// A timeout too large to represent as a deadline waits indefinitely.
    pub fn acquire_timeout(&self, timeout: Duration) -> Result<Lease<P>> {
        let deadline = Instant::now().checked_add(timeout).map(|at| (at, timeout));
        self.acquire_inner(deadline)
    }

    fn acquire_inner(&self, deadline: Option<(Instant, Duration)>) -> Result<Lease<P>> {
        let (slot, info) = {
            let mut state = self.inner.state.lock();
            loop {
                if state.closed {
                    return Err(Error::ShutDown);
                }
                let Some(info) = state.info.clone() else {
                    return Err(Error::NotInitialized);
                };
                if let Some(resource) = state.free.pop_front() {
                    state.loaned += 1;
                    break (Slot::Filled(resource), info);
                }
                if state.vacant > 0 {
                    state.vacant -= 1;
                    state.loaned += 1;
                    break (Slot::Vacant, info);
                }
                match deadline {
                    None => self.inner.available.wait(&mut state),
                    Some((at, timeout)) => {
                        if Instant::now() >= at {
                            return Err(Error::Timeout {
                                timeout_ms: u64::try_from(timeout.as_millis())
                                    .unwrap_or(u64::MAX),
                            });
                        }
                        // timed-out wakes fall through to the deadline check above
                        let _ = self.inner.available.wait_until(&mut state, at);
                    }
                }
            }
        };

        let provider = &self.inner.provider;
        let broken = match slot {
            Slot::Filled(resource) if is_usable(provider, &resource) => {
                self.inner.state.lock().stats.acquisitions += 1;
                return Ok(Lease::new(resource, self.clone()));
            }
            Slot::Filled(resource) => {
                warn!(host = %info.host, "acquired a broken resource, replacing it");
                provider.close(resource);
                true
            }
            Slot::Vacant => {
                debug!(host = %info.host, "refilling vacant slot");
                false
            }
        };

        match self.open_replacement(&info) {
            Ok(resource) => {
                let mut state = self.inner.state.lock();
                state.stats.acquisitions += 1;
                state.stats.created += 1;
                if broken {
                    state.stats.destroyed += 1;
                    state.stats.replacements += 1;
                }
                drop(state);
                Ok(Lease::new(resource, self.clone()))
            }
            Err(e) => {
                let mut state = self.inner.state.lock();
                if broken {
                    state.stats.destroyed += 1;
                }
                state.loaned -= 1;
                state.vacant += 1;
                drop(state);
                self.inner.available.notify_one();
                Err(e)
            }
        }
    }

    /// Reconnect through the retry policy, then one last plain open.
    fn open_replacement(&self, info: &ConnectionInfo) -> Result<P::Resource> {
        let provider = &self.inner.provider;
        match reconnect(provider, info, &self.inner.retry) {
            Ok(resource) => Ok(resource),
            Err(e) => provider.open(info).map_err(|last| {
                error!(host = %info.host, error = %last, "replacement open failed");
                e
            }),
        }
    }

    /// Return a resource to the pool.
    ///
    /// A usable resource goes to the back of the free set and wakes one
    /// waiter. A broken one is closed and replaced with a single open
    /// attempt; if that fails the slot turns vacant. Resources the pool has
    /// no room for, and anything released after [`close`](Self::close), are
    /// closed.
    pub fn release(&self, resource: P::Resource) {
        let provider = &self.inner.provider;
        let usable = is_usable(provider, &resource);

        let info = {
            let mut state = self.inner.state.lock();
            state.stats.releases += 1;
            if state.loaned == 0 {
                drop(state);
                warn!("released a resource the pool never lent out, closing it");
                provider.close(resource);
                return;
            }
            if state.closed {
                state.loaned -= 1;
                state.stats.destroyed += 1;
                drop(state);
                provider.close(resource);
                return;
            }
            if usable {
                state.loaned -= 1;
                state.free.push_back(resource);
                drop(state);
                self.inner.available.notify_one();
                return;
            }
            state.stats.destroyed += 1;
            state.info.clone()
        };

        warn!("released a broken resource, replacing it");
        provider.close(resource);
        let replacement = info.and_then(|info| match provider.open(&info) {
            Ok(resource) => Some(resource),
            Err(e) => {
                error!(host = %info.host, error = %e, "failed to replace released resource");
                None
            }
        });

        let mut state = self.inner.state.lock();
        state.loaned -= 1;
        match replacement {
            Some(fresh) if !state.closed => {
                state.stats.created += 1;
                state.stats.replacements += 1;
                state.free.push_back(fresh);
            }
            Some(fresh) => {
                state.stats.created += 1;
                state.stats.destroyed += 1;
                drop(state);
                provider.close(fresh);
                return;
            }
            None => state.vacant += 1,
        }
        drop(state);
        self.inner.available.notify_one();
    }

    /// Close every idle resource and refuse further acquisitions.
    ///
    /// Waiters wake with [`Error::ShutDown`]. Leased resources are closed when
    /// their holders release them. Idempotent.
    pub fn close(&self) {
        let idle: Vec<_> = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            let idle: Vec<_> = state.free.drain(..).collect();
            state.stats.destroyed += idle.len() as u64;
            idle
        };
        self.inner.available.notify_all();
        info!(closed = idle.len(), "pool closed");
        for resource in idle {
            self.inner.provider.close(resource);
        }
    }

    /// Whether [`initialize`](Self::initialize) has run
    pub fn is_initialized(&self) -> bool {
        self.inner.state.lock().initialized
    }

    /// Whether [`close`](Self::close) has run
    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Number of resources in the free set
    pub fn available(&self) -> usize {
        self.inner.state.lock().free.len()
    }

    /// Configured size, 0 before initialization
    pub fn capacity(&self) -> usize {
        self.inner.state.lock().capacity
    }

    /// Snapshot of connection target and occupancy. `None` before
    /// initialization.
    pub fn info(&self) -> Option<PoolInfo> {
        let state = self.inner.state.lock();
        let info = state.info.as_ref()?;
        Some(PoolInfo {
            host: info.host.clone(),
            principal: info.principal.clone(),
            database: info.database.clone(),
            port: info.port,
            capacity: state.capacity,
            available: state.free.len(),
            in_use: state.loaned,
            vacant: state.vacant,
        })
    }

    /// Lifetime counters
    pub fn stats(&self) -> PoolStats {
        self.inner.state.lock().stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockProvider;
    use pretty_assertions::assert_eq;

    fn pool(size: usize) -> (SharedPool<MockProvider>, MockProvider) {
        let mock = MockProvider::new();
        let pool =
            SharedPool::with_retry(mock.clone(), RetryPolicy::new(2, Duration::from_millis(1)));
        pool.initialize(ConnectionInfo::new("db", "app", "pw", "orders").with_max_resources(size))
            .unwrap();
        (pool, mock)
    }

    #[test]
    fn lease_returns_on_drop() {
        let (pool, _mock) = pool(2);
        {
            let lease = pool.acquire().unwrap();
            assert_eq!(lease.id(), 1);
            assert_eq!(pool.available(), 1);
        }
        assert_eq!(pool.available(), 2);
        assert_eq!(pool.stats().releases, 1);
    }

    #[test]
    fn released_resources_go_to_the_back() {
        let (pool, _mock) = pool(3);
        let first = pool.acquire().unwrap();
        assert_eq!(first.id(), 1);
        drop(first);
        // 2 and 3 were ahead of the released 1
        assert_eq!(pool.acquire().unwrap().id(), 2);
    }

    #[test]
    fn into_inner_keeps_the_slot_on_loan() {
        let (pool, _mock) = pool(1);
        let resource = pool.acquire().unwrap().into_inner();
        assert_eq!(pool.info().unwrap().in_use, 1);
        assert!(matches!(
            pool.acquire_timeout(Duration::from_millis(10)),
            Err(Error::Timeout { timeout_ms: 10 })
        ));
        pool.release(resource);
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn lease_deref_mut_reaches_provider() {
        let (pool, mock) = pool(1);
        let mut lease = pool.acquire().unwrap();
        let out = pool.provider().execute(&mut lease, "SELECT 2".into()).unwrap();
        assert_eq!(out, "1:SELECT 2");
        assert_eq!(mock.executed(), 1);
    }

    #[test]
    fn info_snapshot_and_display() {
        let (pool, _mock) = pool(2);
        let _held = pool.acquire().unwrap();
        let info = pool.info().unwrap();
        assert_eq!(
            info,
            PoolInfo {
                host: "db".into(),
                principal: "app".into(),
                database: "orders".into(),
                port: 3306,
                capacity: 2,
                available: 1,
                in_use: 1,
                vacant: 0,
            }
        );
        assert_eq!(
            info.to_string(),
            "app@db:3306/orders [1 available, 1 in use, 0 vacant, capacity 2]"
        );
    }

    #[test]
    fn dropping_last_handle_closes_idle_resources() {
        let (pool, mock) = pool(3);
        drop(pool);
        assert_eq!(mock.closed(), 3);
        assert!(mock.live_ids().is_empty());
    }
}
