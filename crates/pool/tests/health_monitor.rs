//! Health checks against dispatcher workers.

use std::sync::Arc;
use std::sync::mpsc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use sluice_pool::testing::MockProvider;
use sluice_pool::{
    ConnectionInfo, Dispatcher, DispatcherConfig, HealthReport, HealthSink, RetryPolicy,
};

const WAIT: Duration = Duration::from_secs(5);

fn dispatcher(workers: usize, interval: Duration) -> (Dispatcher<MockProvider>, MockProvider) {
    sluice_log::init_test();
    let mock = MockProvider::new();
    let config = DispatcherConfig::with_workers(workers)
        .retry(RetryPolicy::new(2, Duration::from_millis(5)))
        .health_check_interval(interval);
    let dispatcher =
        Dispatcher::new(mock.clone(), ConnectionInfo::new("db", "app", "pw", "orders"), config)
            .unwrap();
    (dispatcher, mock)
}

fn warm_up(dispatcher: &Dispatcher<MockProvider>) {
    let (tx, rx) = mpsc::channel();
    for i in 0..dispatcher.worker_count() {
        let tx = tx.clone();
        dispatcher
            .submit(format!("warm{i}"), move |r| tx.send(r.is_ok()).unwrap())
            .unwrap();
    }
    for _ in 0..dispatcher.worker_count() {
        assert!(rx.recv_timeout(WAIT).unwrap());
    }
}

#[test]
fn workers_without_resources_report_unhealthy() {
    let (dispatcher, mock) = dispatcher(3, Duration::from_secs(60));
    let report = dispatcher.check_health();
    assert_eq!(report.healthy, 0);
    assert_eq!(report.total, 3);
    assert_eq!(report.unhealthy, vec![0, 1, 2]);
    // probing never opens a resource on its own
    assert_eq!(mock.open_attempts(), 0);
}

#[test]
fn probe_failure_triggers_one_reconnect() {
    let (dispatcher, mock) = dispatcher(2, Duration::from_secs(60));
    warm_up(&dispatcher);
    assert!(dispatcher.check_health().is_all_healthy());

    mock.kill(1);
    let opened_before = mock.opened();
    let report = dispatcher.check_health();
    assert!(report.is_all_healthy(), "{report}");
    assert_eq!(mock.opened(), opened_before + 1);
    assert_eq!(mock.live_ids(), vec![2, 3]);
}

#[test]
fn failed_reconnect_marks_worker_unhealthy() {
    let (dispatcher, mock) = dispatcher(2, Duration::from_secs(60));
    warm_up(&dispatcher);

    mock.kill(2);
    mock.set_open_failing(true);
    let report = dispatcher.check_health();
    assert_eq!(report.healthy, 1);
    assert_eq!(report.unhealthy.len(), 1);

    // the unhealthy worker now has no resource; its next task opens one
    mock.set_open_failing(false);
    warm_up(&dispatcher);
    assert!(dispatcher.check_health().is_all_healthy());
}

#[test]
fn background_monitor_feeds_the_sink() {
    let (dispatcher, _mock) = dispatcher(2, Duration::from_millis(20));
    warm_up(&dispatcher);

    let reports: Arc<Mutex<Vec<HealthReport>>> = Arc::new(Mutex::new(Vec::new()));
    let sink_reports = Arc::clone(&reports);
    let sink: HealthSink = Arc::new(move |r: &HealthReport| sink_reports.lock().push(r.clone()));

    assert!(dispatcher.start_health_check_with(sink).unwrap());
    assert!(!dispatcher.start_health_check().unwrap());

    let deadline = Instant::now() + WAIT;
    while reports.lock().len() < 2 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    assert!(reports.lock().len() >= 2);
    assert!(reports.lock().iter().all(|r| r.total == 2));
    assert!(dispatcher.last_health_report().is_some());
}

#[test]
fn shutdown_stops_a_sleeping_monitor_promptly() {
    let (dispatcher, _mock) = dispatcher(1, Duration::from_secs(30));
    assert!(dispatcher.start_health_check().unwrap());

    let started = Instant::now();
    dispatcher.shutdown();
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(dispatcher.last_health_report().is_none());
}
