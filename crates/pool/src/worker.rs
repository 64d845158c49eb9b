//! Dedicated worker: one thread, one resource, one FIFO queue.
//!
//! The queue lock and the resource slot lock are never held together. Tasks
//! run with the slot locked; health probes only ever `try_lock` it, so a probe
//! never waits behind a running task and a task never shares its resource.
//!
//! A probe that finds tasks queued reports the last known health instead.
//! Otherwise it runs one probe query with the slot locked, and a task that
//! arrives meanwhile waits for at most that query. Reconnects after a failed
//! probe happen with the slot released.

use std::collections::VecDeque;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex};
use sluice_resilience::RetryPolicy;
use tracing::{debug, error, info, trace, warn};

use crate::config::ConnectionInfo;
use crate::error::{Error, Result};
use crate::health::HealthProbe;
use crate::provider::{ResourceProvider, is_usable, reconnect};
use crate::task::Task;

/// Observable worker lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerState {
    /// Waiting for work
    Idle,
    /// Running a task
    Executing,
    /// Stop requested, draining the queue
    Stopping,
    /// Thread has exited and the resource is closed
    Terminated,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Executing => "executing",
            Self::Stopping => "stopping",
            Self::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

const PHASE_IDLE: u8 = 0;
const PHASE_EXECUTING: u8 = 1;
const PHASE_TERMINATED: u8 = 2;

type QueuedTask<P> = Task<<P as ResourceProvider>::Query, <P as ResourceProvider>::Output>;

struct Queue<P: ResourceProvider> {
    tasks: VecDeque<QueuedTask<P>>,
    stopping: bool,
}

struct Core<P: ResourceProvider> {
    id: usize,
    provider: Arc<P>,
    info: Arc<ConnectionInfo>,
    retry: RetryPolicy,
    queue: Mutex<Queue<P>>,
    ready: Condvar,
    slot: Mutex<Option<P::Resource>>,
    healthy: AtomicBool,
    phase: AtomicU8,
}

/// Handle to a worker thread.
///
/// Dropping the handle stops the worker after its queue drains.
pub struct Worker<P: ResourceProvider> {
    core: Arc<Core<P>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl<P: ResourceProvider> Worker<P> {
    /// Start worker `id` on a thread named `sluice-worker-{id}`.
    ///
    /// No resource is opened until the first task arrives.
    pub fn spawn(
        id: usize,
        provider: Arc<P>,
        info: Arc<ConnectionInfo>,
        retry: RetryPolicy,
    ) -> Result<Self> {
        let core = Arc::new(Core::new(id, provider, info, retry));
        let name = format!("sluice-worker-{id}");
        let runner = Arc::clone(&core);
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || runner.run())
            .map_err(|source| Error::Spawn { name, source })?;

        Ok(Self {
            core,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Worker id
    pub fn id(&self) -> usize {
        self.core.id
    }

    /// Queue a task. Never blocks.
    ///
    /// Hands the task back if the worker is stopping.
    pub fn enqueue(&self, task: QueuedTask<P>) -> std::result::Result<(), QueuedTask<P>> {
        {
            let mut queue = self.core.queue.lock();
            if queue.stopping {
                return Err(task);
            }
            queue.tasks.push_back(task);
        }
        self.core.ready.notify_one();
        Ok(())
    }

    /// Tasks waiting, not counting the one running
    pub fn queue_depth(&self) -> usize {
        self.core.queue.lock().tasks.len()
    }

    /// Current lifecycle state
    pub fn state(&self) -> WorkerState {
        match self.core.phase.load(Ordering::Acquire) {
            PHASE_TERMINATED => WorkerState::Terminated,
            PHASE_EXECUTING => WorkerState::Executing,
            _ if self.core.queue.lock().stopping => WorkerState::Stopping,
            _ => WorkerState::Idle,
        }
    }

    /// Result of the last open, task or probe
    pub fn is_healthy(&self) -> bool {
        self.core.healthy.load(Ordering::Acquire)
    }

    /// Probe the resource; see [`HealthProbe::check_connection`].
    pub fn check_connection(&self) -> bool {
        self.core.check_connection()
    }

    /// This worker as a health probe
    pub fn probe(&self) -> Arc<dyn HealthProbe> {
        Arc::clone(&self.core) as Arc<dyn HealthProbe>
    }

    /// Stop accepting tasks, drain the queue and join the thread.
    ///
    /// Idempotent. The resource is closed by the worker thread itself, after
    /// its last task.
    pub fn stop(&self) {
        {
            let mut queue = self.core.queue.lock();
            if !queue.stopping {
                debug!(worker = self.core.id, pending = queue.tasks.len(), "stopping worker");
                queue.stopping = true;
            }
        }
        self.core.ready.notify_all();

        let Some(handle) = self.handle.lock().take() else {
            return;
        };
        if handle.thread().id() == thread::current().id() {
            // stopped from one of our own callbacks; the loop exits on its own
            warn!(worker = self.core.id, "worker stopped from its own thread, not joined");
            return;
        }
        if handle.join().is_err() {
            error!(worker = self.core.id, "worker thread panicked");
        }
    }
}

impl<P: ResourceProvider> Drop for Worker<P> {
    fn drop(&mut self) {
        self.stop();
    }
}

impl<P: ResourceProvider> fmt::Debug for Worker<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.core.id)
            .field("state", &self.state())
            .field("queue_depth", &self.queue_depth())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Worker thread
// ---------------------------------------------------------------------------

impl<P: ResourceProvider> Core<P> {
    fn new(id: usize, provider: Arc<P>, info: Arc<ConnectionInfo>, retry: RetryPolicy) -> Self {
        Self {
            id,
            provider,
            info,
            retry,
            queue: Mutex::new(Queue {
                tasks: VecDeque::new(),
                stopping: false,
            }),
            ready: Condvar::new(),
            slot: Mutex::new(None),
            healthy: AtomicBool::new(false),
            phase: AtomicU8::new(PHASE_IDLE),
        }
    }

    fn run(&self) {
        debug!(worker = self.id, "worker started");
        loop {
            let task = {
                let mut queue = self.queue.lock();
                self.ready
                    .wait_while(&mut queue, |q| q.tasks.is_empty() && !q.stopping);
                match queue.tasks.pop_front() {
                    Some(task) => task,
                    // stopping with nothing left
                    None => break,
                }
            };
            self.phase.store(PHASE_EXECUTING, Ordering::Release);
            self.execute(task);
            self.phase.store(PHASE_IDLE, Ordering::Release);
        }

        if let Some(resource) = self.slot.lock().take() {
            self.provider.close(resource);
        }
        self.healthy.store(false, Ordering::Release);
        self.phase.store(PHASE_TERMINATED, Ordering::Release);
        info!(worker = self.id, "worker terminated");
    }

    fn execute(&self, task: QueuedTask<P>) {
        let (query, callback) = task.into_parts();
        let outcome = {
            let mut slot = self.slot.lock();
            match catch_unwind(AssertUnwindSafe(|| self.run_query(&mut slot, query))) {
                Ok(outcome) => outcome,
                Err(_) => {
                    error!(worker = self.id, "provider panicked, dropping resource");
                    if let Some(resource) = slot.take() {
                        self.provider.close(resource);
                    }
                    self.healthy.store(false, Ordering::Release);
                    Err(Error::TaskPanicked { worker: self.id })
                }
            }
        };

        if let Err(e) = &outcome {
            warn!(worker = self.id, error = %e, "task failed");
        }
        if catch_unwind(AssertUnwindSafe(|| callback(outcome))).is_err() {
            error!(worker = self.id, "task callback panicked");
        }
    }

    fn run_query(&self, slot: &mut Option<P::Resource>, query: P::Query) -> Result<P::Output> {
        let resource = self.ensure_resource(slot)?;
        trace!(worker = self.id, "executing query");
        self.provider
            .execute(resource, query)
            .map_err(|e| Error::query(Some(self.id), e))
    }

    /// Hand out the slot's resource, opening or replacing it first if needed.
    fn ensure_resource<'a>(
        &self,
        slot: &'a mut Option<P::Resource>,
    ) -> Result<&'a mut P::Resource> {
        if let Some(existing) = slot.take() {
            if is_usable(&*self.provider, &existing) {
                return Ok(slot.insert(existing));
            }
            warn!(worker = self.id, "resource is no longer valid, reconnecting");
            self.provider.close(existing);
        }

        match reconnect(&*self.provider, &self.info, &self.retry) {
            Ok(fresh) => {
                debug!(worker = self.id, "resource ready");
                self.healthy.store(true, Ordering::Release);
                Ok(slot.insert(fresh))
            }
            Err(e) => {
                self.healthy.store(false, Ordering::Release);
                Err(e)
            }
        }
    }
}

impl<P: ResourceProvider> HealthProbe for Core<P> {
    fn id(&self) -> usize {
        self.id
    }

    fn check_connection(&self) -> bool {
        if !self.queue.lock().tasks.is_empty() {
            // tasks are waiting for the resource
            return self.healthy.load(Ordering::Acquire);
        }
        let Some(mut slot) = self.slot.try_lock() else {
            // a task holds the resource
            return self.healthy.load(Ordering::Acquire);
        };
        let Some(mut resource) = slot.take() else {
            return false;
        };

        let probe = self.provider.probe_query();
        if is_usable(&*self.provider, &resource)
            && self.provider.execute(&mut resource, probe).is_ok()
        {
            *slot = Some(resource);
            self.healthy.store(true, Ordering::Release);
            return true;
        }

        warn!(worker = self.id, "health probe failed, reconnecting");
        self.provider.close(resource);
        drop(slot);

        // reconnect without the slot so queued tasks are not held up
        let healthy = match reconnect(&*self.provider, &self.info, &self.retry) {
            Ok(fresh) => {
                let mut slot = self.slot.lock();
                if slot.is_none() {
                    *slot = Some(fresh);
                } else {
                    // a task opened its own meanwhile
                    drop(slot);
                    self.provider.close(fresh);
                }
                true
            }
            Err(e) => {
                error!(worker = self.id, error = %e, "health reconnect failed");
                false
            }
        };
        self.healthy.store(healthy, Ordering::Release);
        healthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockProvider, MockResource};
    use std::sync::mpsc;
    use std::time::Duration;

    fn worker(mock: &MockProvider) -> Worker<MockProvider> {
        Worker::spawn(
            7,
            Arc::new(mock.clone()),
            Arc::new(ConnectionInfo::new("db", "app", "pw", "orders")),
            RetryPolicy::new(3, Duration::from_millis(1)),
        )
        .unwrap()
    }

    #[test]
    fn opens_lazily_on_first_task() {
        let mock = MockProvider::new();
        let worker = worker(&mock);
        assert_eq!(mock.opened(), 0);
        assert!(!worker.check_connection());

        let (tx, rx) = mpsc::channel();
        worker
            .enqueue(Task::new("SELECT 1".to_string(), move |r| {
                tx.send(r.unwrap()).unwrap();
            }))
            .unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "1:SELECT 1");
        assert_eq!(mock.opened(), 1);
        assert!(worker.is_healthy());
    }

    #[test]
    fn runs_on_named_thread() {
        let mock = MockProvider::new();
        let worker = worker(&mock);
        let (tx, rx) = mpsc::channel();
        worker
            .enqueue(Task::new("q".to_string(), move |_| {
                tx.send(thread::current().name().map(str::to_owned)).unwrap();
            }))
            .unwrap();
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(5)).unwrap().as_deref(),
            Some("sluice-worker-7")
        );
    }

    #[test]
    fn stop_closes_resource_and_rejects_new_tasks() {
        let mock = MockProvider::new();
        let worker = worker(&mock);
        let (tx, rx) = mpsc::channel();
        worker
            .enqueue(Task::new("q".to_string(), move |r| tx.send(r.is_ok()).unwrap()))
            .unwrap();
        assert!(rx.recv_timeout(Duration::from_secs(5)).unwrap());

        worker.stop();
        assert_eq!(worker.state(), WorkerState::Terminated);
        assert_eq!(mock.closed(), 1);
        assert!(mock.live_ids().is_empty());

        let rejected = worker.enqueue(Task::new("late".to_string(), |_| {}));
        assert_eq!(rejected.map_err(|t| t.query().clone()), Err("late".to_string()));
        worker.stop();
    }

    #[test]
    fn health_probe_reports_last_known_while_executing() {
        let mock = MockProvider::new();
        let worker = worker(&mock);

        let (tx, rx) = mpsc::channel();
        let warmup = tx.clone();
        worker
            .enqueue(Task::new("warmup".to_string(), move |r| warmup.send(r.is_ok()).unwrap()))
            .unwrap();
        assert!(rx.recv_timeout(Duration::from_secs(5)).unwrap());

        mock.set_latency(Duration::from_millis(300));
        worker
            .enqueue(Task::new("slow".to_string(), move |r| tx.send(r.is_ok()).unwrap()))
            .unwrap();
        while worker.state() != WorkerState::Executing {
            thread::sleep(Duration::from_millis(1));
        }
        thread::sleep(Duration::from_millis(50));

        let executed_before = mock.executed();
        assert!(worker.check_connection());
        // the probe did not touch the busy resource
        assert_eq!(mock.executed(), executed_before);
        assert!(rx.recv_timeout(Duration::from_secs(5)).unwrap());
    }

    #[test]
    fn health_check_defers_to_queued_tasks() {
        let mock = MockProvider::new();
        let core = Core::new(
            0,
            Arc::new(mock.clone()),
            Arc::new(ConnectionInfo::new("db", "app", "pw", "orders")),
            RetryPolicy::new(3, Duration::from_millis(1)),
        );
        let info = ConnectionInfo::new("db", "app", "pw", "orders");
        *core.slot.lock() = Some(mock.open(&info).unwrap());
        core.healthy.store(true, Ordering::Release);

        core.queue.lock().tasks.push_back(Task::new("pending".to_string(), |_| {}));
        assert!(core.check_connection());
        assert_eq!(mock.executed(), 0);

        core.queue.lock().tasks.clear();
        assert!(core.check_connection());
        assert_eq!(mock.executed(), 1);
    }

    #[test]
    fn health_check_replaces_resource_marked_closed() {
        let mock = MockProvider::new();
        let core = Core::new(
            0,
            Arc::new(mock.clone()),
            Arc::new(ConnectionInfo::new("db", "app", "pw", "orders")),
            RetryPolicy::new(3, Duration::from_millis(1)),
        );
        let info = ConnectionInfo::new("db", "app", "pw", "orders");
        *core.slot.lock() = Some(mock.open(&info).unwrap());
        assert!(mock.mark_closed(1));

        assert!(core.check_connection());
        assert_eq!(mock.live_ids(), vec![2]);
        assert_eq!(core.slot.lock().as_ref().map(MockResource::id), Some(2));
    }
}
