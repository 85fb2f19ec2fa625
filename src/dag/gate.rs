// src/dag/gate.rs

//! Per-service readiness signalling between controllers.
//!
//! A [`ReleaseGate`] holds status receivers for a service's dependencies
//! (to know when it may start) and for its dependents (to know when it may
//! tear down). There is no global lock; each controller waits on its own
//! gate.

use tokio_util::sync::CancellationToken;

use crate::service::StatusWatch;

#[derive(Debug, Clone, Default)]
pub struct ReleaseGate {
    dependencies: Vec<(String, StatusWatch)>,
    dependents: Vec<(String, StatusWatch)>,
}

impl ReleaseGate {
    pub fn new(
        dependencies: Vec<(String, StatusWatch)>,
        dependents: Vec<(String, StatusWatch)>,
    ) -> Self {
        Self {
            dependencies,
            dependents,
        }
    }

    /// Wait until every dependency has been up at least once.
    ///
    /// `on_stall` is called with the id of a dependency that reached a
    /// terminal state without ever coming up; waiting continues regardless,
    /// so only cancellation ends it. Returns `false` if `cancel` fired.
    pub async fn dependencies_up(
        &mut self,
        cancel: &CancellationToken,
        mut on_stall: impl FnMut(&str),
    ) -> bool {
        for (id, watch) in &mut self.dependencies {
            let mut reported = false;
            loop {
                let snapshot = watch.observe();
                if snapshot.reached_up {
                    break;
                }
                if snapshot.state.is_terminal() && !reported {
                    on_stall(id);
                    reported = true;
                }

                tokio::select! {
                    changed = watch.changed() => {
                        if changed.is_none() {
                            // Controller is gone; nothing will change anymore.
                            cancel.cancelled().await;
                            return false;
                        }
                    }
                    _ = cancel.cancelled() => return false,
                }
            }
        }
        true
    }

    /// Wait until every dependent has reached a terminal state.
    pub async fn dependents_down(&mut self) {
        for (_, watch) in &mut self.dependents {
            let _ = watch.wait_until(|s| s.state.is_terminal()).await;
        }
    }
}
