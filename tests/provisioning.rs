// tests/provisioning.rs

mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use nodevisor::dag::Scheduler;
use nodevisor::service::{Prepared, ProvisionGuard, ServiceState};
use nodevisor::store::{IdempotencyFlag, KvStore, MemoryStore};
use nodevisor_test_utils::builders::{fast_retry, graph_of, svc, test_context};
use nodevisor_test_utils::fakes::{EventLog, FakeService, FlakyStore};

use common::{wait_for_state, wait_until};

const KEY: &str = "cluster/bootstrapped";

fn bootstrap_scheduler(log: &EventLog, store: Arc<dyn KvStore>) -> Scheduler {
    let graph = graph_of(vec![
        svc(FakeService::new("etcd", log)),
        svc(FakeService::new("bootstrap", log)
            .depends_on(&["etcd"])
            .provisioned_by(KEY)),
    ]);
    Scheduler::new(graph, test_context(store))
}

async fn wait_for_flag(store: &MemoryStore) {
    while store.value_of(KEY).is_none() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test(start_paused = true)]
async fn guard_reports_and_records_the_flag() {
    let store = Arc::new(MemoryStore::new());
    let guard = ProvisionGuard::new(KEY, store.clone(), fast_retry(Duration::from_secs(1)));
    let cancel = CancellationToken::new();

    assert_eq!(guard.key(), KEY);
    assert!(!guard.check(&cancel).await.unwrap());

    guard.mark(&cancel).await.unwrap();
    assert!(guard.check(&cancel).await.unwrap());
    assert_eq!(store.value_of(KEY).as_deref(), Some("true"));
}

#[tokio::test(start_paused = true)]
async fn flag_with_another_value_is_not_set() {
    let store = Arc::new(MemoryStore::new().with_entry(KEY, "false"));
    let flag = IdempotencyFlag::new(KEY, store, fast_retry(Duration::from_secs(1)));
    assert!(!flag.is_set(&CancellationToken::new()).await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn set_flag_skips_the_one_time_work() {
    let log = EventLog::new();
    let store = Arc::new(MemoryStore::new().with_entry(KEY, "true"));
    let mut sched = bootstrap_scheduler(&log, store);
    sched.start();

    let snap = wait_for_state(&sched, "bootstrap", ServiceState::Running).await;
    assert_eq!(snap.prepared, Some(Prepared::AlreadyProvisioned));
    assert!(log.contains("bootstrap:pre"));
    assert!(!log.contains("bootstrap:provision"));

    sched.stop().await;
}

#[tokio::test(start_paused = true)]
async fn unset_flag_provisions_exactly_once_across_restarts() {
    let log = EventLog::new();
    let store = Arc::new(MemoryStore::new());

    let mut first = bootstrap_scheduler(&log, store.clone());
    first.start();
    let snap = wait_for_state(&first, "bootstrap", ServiceState::Running).await;
    assert_eq!(snap.prepared, Some(Prepared::Fresh));
    wait_for_flag(&store).await;
    first.stop().await;

    assert_eq!(log.count("bootstrap:provision"), 1);
    assert_eq!(store.value_of(KEY).as_deref(), Some("true"));

    // Same store, new supervisor instance: the flag survives.
    let mut second = bootstrap_scheduler(&log, store.clone());
    second.start();
    let snap = wait_for_state(&second, "bootstrap", ServiceState::Running).await;
    assert_eq!(snap.prepared, Some(Prepared::AlreadyProvisioned));
    second.stop().await;

    assert_eq!(log.count("bootstrap:pre"), 2);
    assert_eq!(log.count("bootstrap:provision"), 1);
}

#[tokio::test(start_paused = true)]
async fn unreachable_store_fails_closed() {
    let log = EventLog::new();
    let store = Arc::new(FlakyStore::new(MemoryStore::new()).without_leader());
    let mut sched = bootstrap_scheduler(&log, store.clone());
    sched.start();

    let snap = wait_for_state(&sched, "bootstrap", ServiceState::Failed).await;
    let err = snap.last_error.unwrap();
    assert!(err.contains(KEY), "{err}");
    assert!(snap.prepared.is_none());

    assert!(store.get_count() > 1, "the read was retried");
    assert_eq!(store.put_count(), 0);
    assert!(!log.contains("bootstrap:provision"));
    assert!(!log.contains("bootstrap:runner"));
    assert!(!log.contains("bootstrap:launch"));

    // The dependency keeps running.
    assert_eq!(
        sched.watch("etcd").unwrap().current().state,
        ServiceState::Running
    );

    sched.stop().await;
}

#[tokio::test(start_paused = true)]
async fn transient_store_errors_are_retried() {
    let log = EventLog::new();
    let store = Arc::new(FlakyStore::new(MemoryStore::new()).failing_first(3));
    let mut sched = bootstrap_scheduler(&log, store.clone());
    sched.start();

    let snap = wait_for_state(&sched, "bootstrap", ServiceState::Running).await;
    assert_eq!(snap.prepared, Some(Prepared::Fresh));
    assert_eq!(store.get_count(), 4);
    assert!(log.contains("bootstrap:provision"));

    while store.value_of(KEY).is_none() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    sched.stop().await;
}

#[tokio::test(start_paused = true)]
async fn shutdown_while_waiting_on_the_store_stops_cleanly() {
    let log = EventLog::new();
    let store = Arc::new(FlakyStore::new(MemoryStore::new()).without_leader());
    let graph = graph_of(vec![svc(FakeService::new("bootstrap", &log).provisioned_by(KEY))]);
    let ctx = test_context(store.clone()).with_retry(fast_retry(Duration::from_secs(3600)));
    let mut sched = Scheduler::new(graph, ctx);
    sched.start();

    wait_until(&sched, "bootstrap", |s| s.state == ServiceState::Preparing).await;
    tokio::time::sleep(Duration::from_secs(5)).await;

    let finals = sched.stop().await;
    assert_eq!(finals[0].state, ServiceState::Stopped);
    assert!(!log.contains("bootstrap:provision"));
}
