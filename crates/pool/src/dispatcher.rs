//! Round-robin dispatch over dedicated workers
//!
//! Selection is a plain wrapping counter: no queue-depth or latency
//! awareness, so a run of expensive tasks can pile up on one worker while the
//! others idle. Callers that need backpressure must limit themselves; the
//! upside is that every task lands on a predictable worker and runs in
//! submission order relative to that worker's other tasks.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::config::{ConnectionInfo, DispatcherConfig};
use crate::error::{Error, Result};
use crate::health::{self, HealthMonitor, HealthProbe, HealthReport, HealthSink};
use crate::provider::ResourceProvider;
use crate::task::Task;
use crate::worker::{Worker, WorkerState};

/// Fixed set of workers fed round robin.
///
/// `Sync`: share it behind an `Arc` and submit from any thread. Dropping it
/// shuts it down.
pub struct Dispatcher<P: ResourceProvider> {
    // emptied by shutdown
    workers: RwLock<Vec<Worker<P>>>,
    cursor: AtomicUsize,
    shut_down: AtomicBool,
    monitor: Mutex<Option<HealthMonitor>>,
    config: DispatcherConfig,
}

impl<P: ResourceProvider> Dispatcher<P> {
    /// Spawn `config.workers` workers against `info`.
    ///
    /// Resources are opened lazily, on each worker's first task.
    pub fn new(provider: P, info: ConnectionInfo, config: DispatcherConfig) -> Result<Self> {
        config.validate()?;
        let provider = Arc::new(provider);
        let info = Arc::new(info);

        let workers = (0..config.workers)
            .map(|id| Worker::spawn(id, Arc::clone(&provider), Arc::clone(&info), config.retry))
            .collect::<Result<Vec<_>>>()?;

        info!(
            host = %info.host,
            database = %info.database,
            workers = workers.len(),
            "dispatcher started"
        );
        Ok(Self {
            workers: RwLock::new(workers),
            cursor: AtomicUsize::new(0),
            shut_down: AtomicBool::new(false),
            monitor: Mutex::new(None),
            config,
        })
    }

    /// Queue `query` on the next worker; `callback` receives the outcome.
    ///
    /// Never blocks. After [`shutdown`](Self::shutdown) this returns
    /// [`Error::ShutDown`] and the callback is dropped uncalled.
    pub fn submit<F>(&self, query: P::Query, callback: F) -> Result<()>
    where
        F: FnOnce(Result<P::Output>) + Send + 'static,
    {
        self.submit_task(Task::new(query, callback))
    }

    /// Queue a prepared task on the next worker.
    pub fn submit_task(&self, task: Task<P::Query, P::Output>) -> Result<()> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(Error::ShutDown);
        }
        let workers = self.workers.read();
        if workers.is_empty() {
            return Err(Error::ShutDown);
        }
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % workers.len();
        let worker = &workers[index];
        worker.enqueue(task).map_err(|_rejected| {
            debug!(worker = worker.id(), "worker stopping, task rejected");
            Error::ShutDown
        })
    }

    /// Start the periodic health monitor.
    ///
    /// Returns `Ok(false)` if it is already running.
    pub fn start_health_check(&self) -> Result<bool> {
        self.start_monitor(None)
    }

    /// Like [`start_health_check`](Self::start_health_check), also handing
    /// each report to `sink`.
    pub fn start_health_check_with(&self, sink: HealthSink) -> Result<bool> {
        self.start_monitor(Some(sink))
    }

    fn start_monitor(&self, sink: Option<HealthSink>) -> Result<bool> {
        let mut monitor = self.monitor.lock();
        if self.shut_down.load(Ordering::Acquire) {
            return Err(Error::ShutDown);
        }
        if monitor.is_some() {
            debug!("health check already running");
            return Ok(false);
        }
        *monitor = Some(HealthMonitor::spawn(
            self.probes(),
            self.config.health_check_interval,
            sink,
        )?);
        Ok(true)
    }

    /// Probe every worker once, on the calling thread.
    pub fn check_health(&self) -> HealthReport {
        health::check_all(&self.probes())
    }

    /// Latest report of the background monitor
    pub fn last_health_report(&self) -> Option<HealthReport> {
        self.monitor.lock().as_ref().and_then(HealthMonitor::last_report)
    }

    fn probes(&self) -> Vec<Arc<dyn HealthProbe>> {
        self.workers.read().iter().map(Worker::probe).collect()
    }

    /// Refuse new tasks, stop the monitor, drain and join every worker, then
    /// release them.
    ///
    /// Idempotent; also runs on drop.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        // take it out first so the monitor lock is not held while joining
        let monitor = self.monitor.lock().take();
        drop(monitor);

        // callbacks run during the drain may still call in, so no lock is
        // held while joining
        let workers = std::mem::take(&mut *self.workers.write());
        info!(workers = workers.len(), "dispatcher shutting down");
        for worker in &workers {
            worker.stop();
        }
        let leftover: usize = workers.iter().map(Worker::queue_depth).sum();
        if leftover > 0 {
            warn!(leftover, "tasks left behind at shutdown");
        }
        drop(workers);
        info!("dispatcher shut down");
    }

    /// Whether [`shutdown`](Self::shutdown) has been called
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Number of workers, 0 once shut down
    pub fn worker_count(&self) -> usize {
        self.workers.read().len()
    }

    /// Pending tasks per worker, by worker id
    pub fn queue_depths(&self) -> Vec<usize> {
        self.workers.read().iter().map(Worker::queue_depth).collect()
    }

    /// Lifecycle state per worker, by worker id
    pub fn worker_states(&self) -> Vec<WorkerState> {
        self.workers.read().iter().map(Worker::state).collect()
    }

    /// Active configuration
    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }
}

impl<P: ResourceProvider> Drop for Dispatcher<P> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl<P: ResourceProvider> fmt::Debug for Dispatcher<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("workers", &self.worker_count())
            .field("shut_down", &self.is_shut_down())
            .field("queue_depths", &self.queue_depths())
            .finish_non_exhaustive()
    }
}
