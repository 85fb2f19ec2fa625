#![allow(dead_code)]

pub use nodevisor_test_utils::{init_tracing, with_timeout};

use nodevisor::dag::Scheduler;
use nodevisor::service::{ServiceSnapshot, ServiceState};

/// Wait until service `id` satisfies `pred`.
pub async fn wait_until(
    scheduler: &Scheduler,
    id: &str,
    pred: impl FnMut(&ServiceSnapshot) -> bool,
) -> ServiceSnapshot {
    let mut watch = scheduler.watch(id).expect("unknown service");
    watch
        .wait_until(pred)
        .await
        .expect("controller went away")
}

pub async fn wait_for_state(scheduler: &Scheduler, id: &str, state: ServiceState) -> ServiceSnapshot {
    let mut watch = scheduler.watch(id).expect("unknown service");
    watch
        .wait_for_state(state)
        .await
        .expect("controller went away")
}

pub fn state_of(scheduler: &Scheduler, id: &str) -> ServiceState {
    scheduler.watch(id).expect("unknown service").current().state
}
