// tests/restart_policy.rs

use std::time::Duration;

use tokio::sync::mpsc;

use nodevisor::runner::{
    ProcessOutcome, RestartEvent, RestartPolicy, RestartSettings, Restarter, Termination,
};
use nodevisor_test_utils::fakes::{Script, ScriptedRunner};

const DELAY: Duration = Duration::from_millis(100);

fn restarter(runner: &ScriptedRunner, policy: RestartPolicy) -> Restarter {
    Restarter::new("svc", Box::new(runner.clone()), RestartSettings::new(policy, DELAY))
}

async fn run_to_end(
    runner: &ScriptedRunner,
    policy: RestartPolicy,
) -> (Termination, Vec<RestartEvent>) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let termination = restarter(runner, policy).run(tx).await;
    let mut events = Vec::new();
    while let Ok(e) = rx.try_recv() {
        events.push(e);
    }
    (termination, events)
}

#[tokio::test(start_paused = true)]
async fn forever_relaunches_a_crashing_process_with_a_minimum_delay() {
    let runner = ScriptedRunner::always(Script::fail_after(Duration::from_millis(10)));
    let r = restarter(&runner, RestartPolicy::Forever);
    let handle = r.handle();
    let (tx, _rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(r.run(tx));

    tokio::time::sleep(Duration::from_secs(2)).await;
    handle.stop();
    assert_eq!(task.await.unwrap(), Termination::Stopped);

    let launches = runner.launch_times();
    assert!(launches.len() >= 10, "only {} launches", launches.len());
    for pair in launches.windows(2) {
        assert!(pair[1] - pair[0] >= DELAY, "relaunched after {:?}", pair[1] - pair[0]);
    }
}

#[tokio::test(start_paused = true)]
async fn forever_relaunches_after_clean_exits_and_launch_failures_too() {
    let runner = ScriptedRunner::always(Script::succeed_after(Duration::from_millis(10)))
        .then(Script::LaunchError)
        .then(Script::succeed_after(Duration::from_millis(10)));
    let r = restarter(&runner, RestartPolicy::Forever);
    let handle = r.handle();
    let (tx, _rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(r.run(tx));

    tokio::time::sleep(Duration::from_secs(1)).await;
    handle.stop();
    task.await.unwrap();

    assert!(runner.launch_count() >= 5);
}

#[tokio::test(start_paused = true)]
async fn once_launches_exactly_once_on_failure() {
    let runner = ScriptedRunner::always(Script::fail_after(Duration::from_millis(50)));
    let (termination, events) = run_to_end(&runner, RestartPolicy::Once).await;

    assert!(matches!(termination, Termination::Failed(_)));
    assert_eq!(runner.launch_count(), 1);
    assert_eq!(
        events,
        vec![
            RestartEvent::Launched { attempt: 1 },
            RestartEvent::Exited {
                attempt: 1,
                outcome: ProcessOutcome::Failed(1)
            },
        ]
    );

    // Nothing else happens later either.
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(runner.launch_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn once_launches_exactly_once_on_success() {
    let runner = ScriptedRunner::always(Script::succeed_after(Duration::from_millis(50)));
    let (termination, _) = run_to_end(&runner, RestartPolicy::Once).await;

    assert_eq!(termination, Termination::Completed);
    assert_eq!(runner.launch_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn once_treats_a_failed_launch_as_terminal() {
    let runner = ScriptedRunner::always(Script::LaunchError);
    let (termination, events) = run_to_end(&runner, RestartPolicy::Once).await;

    assert!(matches!(termination, Termination::Failed(msg) if msg.contains("scripted launch failure")));
    assert_eq!(runner.launch_count(), 1);
    assert!(matches!(events.as_slice(), [RestartEvent::LaunchFailed { attempt: 1, .. }]));
}

#[tokio::test(start_paused = true)]
async fn until_success_stops_relaunching_after_a_clean_exit() {
    let runner = ScriptedRunner::always(Script::succeed_after(Duration::from_millis(10)))
        .then(Script::fail_after(Duration::from_millis(10)))
        .then(Script::LaunchError)
        .then(Script::fail_after(Duration::from_millis(10)));
    let (termination, events) = run_to_end(&runner, RestartPolicy::UntilSuccess).await;

    assert_eq!(termination, Termination::Completed);
    assert_eq!(runner.launch_count(), 4);
    assert_eq!(
        events.last(),
        Some(&RestartEvent::Exited {
            attempt: 4,
            outcome: ProcessOutcome::Success
        })
    );
}

#[tokio::test(start_paused = true)]
async fn stop_terminates_the_current_attempt_and_prevents_relaunch() {
    let runner = ScriptedRunner::blocking();
    let r = restarter(&runner, RestartPolicy::Forever);
    let handle = r.handle();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(r.run(tx));

    assert_eq!(rx.recv().await, Some(RestartEvent::Launched { attempt: 1 }));
    assert!(!handle.is_stopped());

    handle.stop();
    assert_eq!(task.await.unwrap(), Termination::Stopped);
    assert!(handle.is_stopped());
    assert_eq!(runner.stop_count(), 1);

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(runner.launch_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn stop_during_the_restart_delay_prevents_relaunch() {
    let runner = ScriptedRunner::always(Script::fail_after(Duration::from_millis(10)));
    let r = Restarter::new(
        "svc",
        Box::new(runner.clone()),
        RestartSettings::new(RestartPolicy::Forever, Duration::from_secs(30)),
    );
    let handle = r.handle();
    let (tx, _rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(r.run(tx));

    tokio::time::sleep(Duration::from_secs(1)).await;
    handle.stop();
    assert_eq!(task.await.unwrap(), Termination::Stopped);
    assert_eq!(runner.launch_count(), 1);
    // The attempt had already exited; nothing to stop.
    assert_eq!(runner.stop_count(), 0);
}

#[test]
fn policy_names_parse() {
    assert_eq!("forever".parse::<RestartPolicy>().unwrap(), RestartPolicy::Forever);
    assert_eq!("Once".parse::<RestartPolicy>().unwrap(), RestartPolicy::Once);
    assert_eq!(
        "until-success".parse::<RestartPolicy>().unwrap(),
        RestartPolicy::UntilSuccess
    );
    assert!("sometimes".parse::<RestartPolicy>().is_err());
}
