//! Periodic health probing of pool workers

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};

/// Something whose connection can be checked
pub trait HealthProbe: Send + Sync {
    /// Stable identifier, reported in [`HealthReport::unhealthy`]
    fn id(&self) -> usize;

    /// `false` if there is no resource yet. Otherwise run a trivial probe; on
    /// failure try one reconnect and report whether it worked.
    fn check_connection(&self) -> bool;
}

/// Outcome of one probing round
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthReport {
    /// Probes that reported healthy
    pub healthy: usize,
    /// Probes checked
    pub total: usize,
    /// Ids of the probes that did not
    pub unhealthy: Vec<usize>,
    /// When the round finished
    pub checked_at: DateTime<Utc>,
}

impl HealthReport {
    /// Every probe healthy
    pub fn is_all_healthy(&self) -> bool {
        self.healthy == self.total
    }
}

impl fmt::Display for HealthReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} healthy", self.healthy, self.total)
    }
}

/// Receives every report produced by a [`HealthMonitor`]
pub type HealthSink = Arc<dyn Fn(&HealthReport) + Send + Sync>;

/// Probe every entry once and aggregate.
///
/// A panicking probe counts as unhealthy.
pub fn check_all(probes: &[Arc<dyn HealthProbe>]) -> HealthReport {
    let mut unhealthy = Vec::new();
    for probe in probes {
        let healthy = catch_unwind(AssertUnwindSafe(|| probe.check_connection()))
            .unwrap_or_else(|_| {
                error!(worker = probe.id(), "health probe panicked");
                false
            });
        if !healthy {
            unhealthy.push(probe.id());
        }
    }
    HealthReport {
        healthy: probes.len() - unhealthy.len(),
        total: probes.len(),
        unhealthy,
        checked_at: Utc::now(),
    }
}

struct Shared {
    stop: Mutex<bool>,
    wake: Condvar,
    last: Mutex<Option<HealthReport>>,
}

/// Background thread that probes on a fixed period.
///
/// Sleeps first, then checks. [`stop`](Self::stop) wakes it immediately.
pub struct HealthMonitor {
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
    interval: Duration,
}

impl HealthMonitor {
    /// Start probing `probes` every `interval` on a thread named
    /// `sluice-health`.
    pub fn spawn(
        probes: Vec<Arc<dyn HealthProbe>>,
        interval: Duration,
        sink: Option<HealthSink>,
    ) -> Result<Self> {
        if interval.is_zero() {
            return Err(Error::configuration("health check interval must be greater than zero"));
        }
        let shared = Arc::new(Shared {
            stop: Mutex::new(false),
            wake: Condvar::new(),
            last: Mutex::new(None),
        });

        let runner = Arc::clone(&shared);
        let name = "sluice-health".to_string();
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || run(&runner, &probes, interval, sink.as_ref()))
            .map_err(|source| Error::Spawn { name, source })?;

        info!(interval_ms = interval.as_millis() as u64, "health monitor started");
        Ok(Self {
            shared,
            handle: Some(handle),
            interval,
        })
    }

    /// Probing period
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Most recent report, if a round has completed
    pub fn last_report(&self) -> Option<HealthReport> {
        self.shared.last.lock().clone()
    }

    /// Whether the thread is still running
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Wake the thread, wait for it to exit. Idempotent.
    pub fn stop(&mut self) {
        *self.shared.stop.lock() = true;
        self.shared.wake.notify_all();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("health monitor thread panicked");
            }
            debug!("health monitor stopped");
        }
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for HealthMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HealthMonitor")
            .field("interval", &self.interval)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

fn run(
    shared: &Shared,
    probes: &[Arc<dyn HealthProbe>],
    interval: Duration,
    sink: Option<&HealthSink>,
) {
    let mut stop = shared.stop.lock();
    loop {
        let _ = shared.wake.wait_while_for(&mut stop, |stop| !*stop, interval);
        if *stop {
            break;
        }
        MutexGuard::unlocked(&mut stop, || tick(shared, probes, sink));
    }
}

fn tick(shared: &Shared, probes: &[Arc<dyn HealthProbe>], sink: Option<&HealthSink>) {
    let report = check_all(probes);
    if report.is_all_healthy() {
        info!(healthy = report.healthy, total = report.total, "health check");
    } else {
        warn!(
            healthy = report.healthy,
            total = report.total,
            unhealthy = ?report.unhealthy,
            "health check"
        );
    }
    if let Some(sink) = sink {
        if catch_unwind(AssertUnwindSafe(|| sink(&report))).is_err() {
            error!("health sink panicked");
        }
    }
    *shared.last.lock() = Some(report);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Instant;

    struct Flag {
        id: usize,
        healthy: AtomicBool,
        checks: AtomicUsize,
    }

    impl Flag {
        fn new(id: usize, healthy: bool) -> Arc<Self> {
            Arc::new(Self {
                id,
                healthy: AtomicBool::new(healthy),
                checks: AtomicUsize::new(0),
            })
        }
    }

    impl HealthProbe for Flag {
        fn id(&self) -> usize {
            self.id
        }

        fn check_connection(&self) -> bool {
            self.checks.fetch_add(1, Ordering::SeqCst);
            self.healthy.load(Ordering::SeqCst)
        }
    }

    struct Panicky;

    impl HealthProbe for Panicky {
        fn id(&self) -> usize {
            9
        }

        fn check_connection(&self) -> bool {
            panic!("probe blew up")
        }
    }

    #[test]
    fn aggregates_healthy_and_unhealthy() {
        let probes: Vec<Arc<dyn HealthProbe>> = vec![
            Flag::new(0, true) as Arc<dyn HealthProbe>,
            Flag::new(1, false),
            Arc::new(Panicky),
        ];
        let report = check_all(&probes);
        assert_eq!(report.healthy, 1);
        assert_eq!(report.total, 3);
        assert_eq!(report.unhealthy, vec![1, 9]);
        assert!(!report.is_all_healthy());
        assert_eq!(report.to_string(), "1/3 healthy");
    }

    #[test]
    fn ticks_until_stopped() {
        let flag = Flag::new(0, true);
        let reports = Arc::new(Mutex::new(Vec::new()));
        let sink_reports = Arc::clone(&reports);
        let sink: HealthSink =
            Arc::new(move |r: &HealthReport| sink_reports.lock().push(r.clone()));

        let probes = vec![flag.clone() as Arc<dyn HealthProbe>];
        let mut monitor =
            HealthMonitor::spawn(probes, Duration::from_millis(10), Some(sink)).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while reports.lock().len() < 3 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        monitor.stop();
        assert!(!monitor.is_running());

        let seen = reports.lock().len();
        assert!(seen >= 3);
        assert!(flag.checks.load(Ordering::SeqCst) >= 3);
        assert_eq!(monitor.last_report().map(|r| r.total), Some(1));

        thread::sleep(Duration::from_millis(30));
        assert_eq!(reports.lock().len(), seen);
        monitor.stop();
    }

    #[test]
    fn stop_does_not_wait_out_the_period() {
        let probes = vec![Flag::new(0, true) as Arc<dyn HealthProbe>];
        let mut monitor = HealthMonitor::spawn(probes, Duration::from_secs(60), None).unwrap();
        let started = Instant::now();
        monitor.stop();
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(monitor.last_report().is_none());
    }

    #[test]
    fn zero_interval_rejected() {
        assert!(matches!(
            HealthMonitor::spawn(Vec::new(), Duration::ZERO, None),
            Err(Error::Configuration { .. })
        ));
    }
}
