// tests/service_lifecycle.rs

mod common;

use std::sync::Arc;
use std::time::Duration;

use nodevisor::dag::Scheduler;
use nodevisor::health::{HealthSettings, HealthStatus};
use nodevisor::registrar::RouteTable;
use nodevisor::runner::{RestartPolicy, RestartSettings};
use nodevisor::service::ServiceState;
use nodevisor::store::MemoryStore;
use nodevisor_test_utils::builders::{graph_of, svc, test_context};
use nodevisor_test_utils::fakes::{
    EventLog, FakeService, Script, ScriptedProbe, ScriptedRunner, ToggleCondition,
};

use common::{init_tracing, state_of, wait_for_state, wait_until};

fn scheduler(services: Vec<FakeService>) -> Scheduler {
    let graph = graph_of(services.into_iter().map(svc).collect());
    Scheduler::new(graph, test_context(Arc::new(MemoryStore::new())))
}

#[tokio::test(start_paused = true)]
async fn dependent_pre_hook_runs_after_dependency_launch() {
    init_tracing();
    let log = EventLog::new();
    let mut sched = scheduler(vec![
        FakeService::new("bootstrap", &log).depends_on(&["etcd"]),
        FakeService::new("etcd", &log),
    ]);
    sched.start();

    wait_for_state(&sched, "bootstrap", ServiceState::Running).await;
    assert_eq!(state_of(&sched, "etcd"), ServiceState::Running);

    let etcd_launch = log.position("etcd:launch").unwrap();
    let bootstrap_pre = log.position("bootstrap:pre").unwrap();
    assert!(etcd_launch < bootstrap_pre, "{:?}", log.entries());

    let snapshot = sched.snapshot();
    let ids: Vec<&str> = snapshot.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec!["etcd", "bootstrap"]);

    let finals = sched.stop().await;
    assert!(finals.iter().all(|s| s.state == ServiceState::Stopped), "{finals:?}");
}

#[tokio::test(start_paused = true)]
async fn dependent_waits_while_dependency_is_not_up() {
    let log = EventLog::new();
    let gate = ToggleCondition::new();
    let mut sched = scheduler(vec![
        FakeService::new("etcd", &log).with_condition(gate.clone()),
        FakeService::new("bootstrap", &log).depends_on(&["etcd"]),
    ]);
    sched.start();

    wait_for_state(&sched, "etcd", ServiceState::Waiting).await;
    tokio::time::sleep(Duration::from_secs(30)).await;

    let bootstrap = sched.watch("bootstrap").unwrap().current();
    assert_eq!(bootstrap.state, ServiceState::Pending);
    assert!(bootstrap.stalled_on.is_none());
    assert!(!log.contains("bootstrap:pre"));

    gate.set(true);
    wait_for_state(&sched, "bootstrap", ServiceState::Running).await;

    sched.stop().await;
}

#[tokio::test(start_paused = true)]
async fn failed_dependency_leaves_dependents_stalled() {
    let log = EventLog::new();
    let mut sched = scheduler(vec![
        FakeService::new("etcd", &log).failing_pre("disk not mounted"),
        FakeService::new("trustd", &log).depends_on(&["etcd"]),
        FakeService::new("apid", &log).depends_on(&["trustd"]),
        FakeService::new("udevd", &log),
    ]);
    sched.start();

    let etcd = wait_for_state(&sched, "etcd", ServiceState::Failed).await;
    let err = etcd.last_error.unwrap();
    assert!(err.contains("pre hook") && err.contains("disk not mounted"), "{err}");

    let trustd = wait_until(&sched, "trustd", |s| s.stalled_on.is_some()).await;
    assert_eq!(trustd.state, ServiceState::Pending);
    assert_eq!(trustd.stalled_on.as_deref(), Some("etcd"));

    // Unrelated services are unaffected.
    wait_for_state(&sched, "udevd", ServiceState::Running).await;

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(state_of(&sched, "apid"), ServiceState::Pending);
    assert!(!log.contains("trustd:pre"));
    assert!(!log.contains("apid:pre"));

    let finals = sched.stop().await;
    let state = |id: &str| finals.iter().find(|s| s.id == id).unwrap().state;
    assert_eq!(state("etcd"), ServiceState::Failed);
    assert_eq!(state("trustd"), ServiceState::Stopped);
    assert_eq!(state("apid"), ServiceState::Stopped);
    assert_eq!(state("udevd"), ServiceState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn shutdown_stops_dependents_first() {
    let log = EventLog::new();
    let mut sched = scheduler(vec![
        FakeService::new("a", &log),
        FakeService::new("b", &log).depends_on(&["a"]),
        FakeService::new("c", &log).depends_on(&["b"]),
    ]);
    sched.start();
    wait_for_state(&sched, "c", ServiceState::Running).await;

    sched.stop().await;

    let c = log.position("c:stop").unwrap();
    let b = log.position("b:stop").unwrap();
    let a = log.position("a:stop").unwrap();
    assert!(c < b && b < a, "{:?}", log.entries());
}

#[tokio::test(start_paused = true)]
async fn start_condition_gates_the_pre_hook() {
    let log = EventLog::new();
    let gate = ToggleCondition::new();
    let mut sched = scheduler(vec![FakeService::new("kubelet", &log).with_condition(gate.clone())]);
    sched.start();

    wait_for_state(&sched, "kubelet", ServiceState::Waiting).await;
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(!log.contains("kubelet:pre"));
    assert!(gate.check_count() > 1);

    gate.set(true);
    wait_for_state(&sched, "kubelet", ServiceState::Running).await;
    assert!(log.contains("kubelet:pre"));

    sched.stop().await;
}

#[tokio::test(start_paused = true)]
async fn stop_during_condition_wait_skips_the_hooks() {
    let log = EventLog::new();
    let mut sched = scheduler(vec![FakeService::new("kubelet", &log).with_condition(ToggleCondition::new())]);
    sched.start();
    wait_for_state(&sched, "kubelet", ServiceState::Waiting).await;

    let finals = sched.stop().await;
    assert_eq!(finals[0].state, ServiceState::Stopped);
    assert!(!log.contains("kubelet:pre"));
    assert!(!log.contains("kubelet:runner"));
}

#[tokio::test(start_paused = true)]
async fn nothing_to_run_finishes_and_releases_dependents() {
    let log = EventLog::new();
    let mut sched = scheduler(vec![
        FakeService::new("setup", &log).without_runner(),
        FakeService::new("apid", &log).depends_on(&["setup"]),
    ]);
    sched.start();

    wait_for_state(&sched, "setup", ServiceState::Finished).await;
    wait_for_state(&sched, "apid", ServiceState::Running).await;
    assert!(!log.contains("setup:launch"));
    assert_eq!(log.count("setup:post"), 1);
    assert!(log.position("setup:runner").unwrap() < log.position("setup:post").unwrap());
    assert!(log.position("setup:post").unwrap() < log.position("apid:pre").unwrap());

    let finals = sched.stop().await;
    assert_eq!(finals[0].state, ServiceState::Finished);
    assert_eq!(finals[1].state, ServiceState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn post_failure_without_runner_still_finishes() {
    let log = EventLog::new();
    let mut sched = scheduler(vec![
        FakeService::new("setup", &log)
            .without_runner()
            .failing_post("flag write failed"),
    ]);
    sched.start();

    let snap = wait_for_state(&sched, "setup", ServiceState::Finished).await;
    assert!(snap.last_error.unwrap().contains("flag write failed"));

    sched.stop().await;
}

#[tokio::test(start_paused = true)]
async fn runner_factory_error_fails_the_service() {
    let log = EventLog::new();
    let mut sched = scheduler(vec![FakeService::new("cri", &log).failing_runner_factory()]);
    sched.start();

    let snap = wait_for_state(&sched, "cri", ServiceState::Failed).await;
    assert!(snap.last_error.unwrap().contains("scripted runner factory failure"));
    assert!(!log.contains("cri:launch"));

    sched.stop().await;
}

#[tokio::test(start_paused = true)]
async fn once_policy_failure_is_terminal() {
    let log = EventLog::new();
    let runner = ScriptedRunner::always(Script::fail_after(Duration::from_millis(50)));
    let mut sched = scheduler(vec![FakeService::new("cri", &log).with_runner(runner.clone())]);
    sched.start();

    let snap = wait_for_state(&sched, "cri", ServiceState::Failed).await;
    assert_eq!(snap.restart_count, 0);
    assert!(snap.reached_up);
    assert!(snap.last_error.unwrap().contains("exited"));

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(runner.launch_count(), 1);

    sched.stop().await;
}

#[tokio::test(start_paused = true)]
async fn once_policy_success_finishes() {
    let log = EventLog::new();
    let runner = ScriptedRunner::always(Script::succeed_after(Duration::from_millis(50)));
    let mut sched = scheduler(vec![FakeService::new("job", &log).with_runner(runner)]);
    sched.start();

    wait_for_state(&sched, "job", ServiceState::Finished).await;
    sched.stop().await;
}

#[tokio::test(start_paused = true)]
async fn forever_restarts_count_up_while_post_runs_once() {
    let log = EventLog::new();
    let runner = ScriptedRunner::always(Script::fail_after(Duration::from_millis(100)));
    let mut sched = scheduler(vec![
        FakeService::new("udevd", &log)
            .with_runner(runner.clone())
            .with_restart(RestartSettings::new(RestartPolicy::Forever, Duration::from_millis(100))),
    ]);
    sched.start();

    let snap = wait_until(&sched, "udevd", |s| s.restart_count >= 3).await;
    assert_eq!(snap.state, ServiceState::Running);
    assert_eq!(log.count("udevd:post"), 1);
    assert_eq!(log.count("udevd:pre"), 1);
    assert_eq!(runner.launch_count(), 4);

    sched.stop().await;
}

#[tokio::test(start_paused = true)]
async fn post_hook_failure_is_reported_but_not_fatal() {
    let log = EventLog::new();
    let mut sched = scheduler(vec![FakeService::new("apid", &log).failing_post("cert upload failed")]);
    sched.start();

    let snap = wait_until(&sched, "apid", |s| s.last_error.is_some()).await;
    assert_eq!(snap.state, ServiceState::Running);
    assert!(snap.last_error.unwrap().contains("cert upload failed"));

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(state_of(&sched, "apid"), ServiceState::Running);

    sched.stop().await;
}

#[tokio::test(start_paused = true)]
async fn degraded_health_does_not_stop_the_service() {
    let log = EventLog::new();
    let probe = ScriptedProbe::new([true, false]);
    let settings = HealthSettings {
        initial_delay: Duration::ZERO,
        interval: Duration::from_secs(1),
        timeout: Duration::from_millis(200),
        threshold: 2,
    };
    let ctx = test_context(Arc::new(MemoryStore::new()));
    let board = ctx.health.clone();
    let graph = graph_of(vec![svc(FakeService::new("etcd", &log).with_health(probe, settings))]);
    let mut sched = Scheduler::new(graph, ctx);
    sched.start();

    wait_until(&sched, "etcd", |s| s.health.status == HealthStatus::Healthy).await;
    let snap = wait_until(&sched, "etcd", |s| s.health.status == HealthStatus::Degraded).await;
    assert_eq!(snap.state, ServiceState::Running);
    assert_eq!(snap.health.consecutive_failures, 2);
    assert_eq!(
        board.report_of("etcd").map(|r| r.status),
        Some(HealthStatus::Degraded)
    );
    assert!(!log.contains("etcd:stop"));

    sched.stop().await;
    assert!(board.report_of("etcd").is_none());
}

#[tokio::test(start_paused = true)]
async fn running_services_are_registered_until_stopped() {
    let log = EventLog::new();
    let routes = RouteTable::new();
    let ctx = test_context(Arc::new(MemoryStore::new())).with_registrar(Arc::new(routes.clone()));
    let graph = graph_of(vec![
        svc(FakeService::new("apid", &log).with_address("127.0.0.1:50000")),
        svc(FakeService::new("machined", &log)),
    ]);
    let mut sched = Scheduler::new(graph, ctx);
    sched.start();

    // Registration happens before the post hook.
    wait_for_state(&sched, "apid", ServiceState::Running).await;
    while !log.contains("apid:post") {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(routes.address_of("apid").as_deref(), Some("127.0.0.1:50000"));
    assert_eq!(routes.routes().len(), 1);

    sched.stop().await;
    assert!(routes.address_of("apid").is_none());
}
