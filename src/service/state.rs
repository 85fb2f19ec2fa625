// src/service/state.rs

use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;

use crate::health::HealthReport;

use super::Prepared;

/// Lifecycle of one service instance.
///
/// ```text
/// Pending → Waiting → Preparing → Starting → Running → Stopping → Stopped
///                                     │          │
///                                     │          └──→ Finished | Failed
///                                     └──→ Finished (nothing to run) | Failed
/// ```
///
/// Health (`Healthy`/`Degraded`) is tracked separately in
/// [`ServiceSnapshot::health`]; it never changes the lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceState {
    /// Waiting for dependencies.
    Pending,
    /// Dependencies satisfied; polling the start condition.
    Waiting,
    /// Running the pre hook.
    Preparing,
    /// Building the runner and launching the first attempt.
    Starting,
    Running,
    /// Completed without a long-running process.
    Finished,
    Stopping,
    Stopped,
    Failed,
}

impl ServiceState {
    /// States that satisfy dependents.
    pub fn is_up(&self) -> bool {
        matches!(self, ServiceState::Running | ServiceState::Finished)
    }

    /// The controller will not leave this state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ServiceState::Finished | ServiceState::Stopped | ServiceState::Failed
        )
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ServiceState::Pending => "pending",
            ServiceState::Waiting => "waiting",
            ServiceState::Preparing => "preparing",
            ServiceState::Starting => "starting",
            ServiceState::Running => "running",
            ServiceState::Finished => "finished",
            ServiceState::Stopping => "stopping",
            ServiceState::Stopped => "stopped",
            ServiceState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Point-in-time view of a service instance, as published by its controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSnapshot {
    pub id: String,
    pub state: ServiceState,
    /// Relaunches performed by the restart policy (launches minus one).
    pub restart_count: u32,
    pub health: HealthReport,
    /// Set while the service is blocked on a dependency that can no longer
    /// come up.
    pub stalled_on: Option<String>,
    pub last_error: Option<String>,
    /// Outcome of the pre hook, once it ran.
    pub prepared: Option<Prepared>,
    /// Sticky: the service has been `Running` or `Finished` at some point.
    /// Dependents are released on this, not on the current state.
    pub reached_up: bool,
}

impl ServiceSnapshot {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state: ServiceState::Pending,
            restart_count: 0,
            health: HealthReport::default(),
            stalled_on: None,
            last_error: None,
            prepared: None,
            reached_up: false,
        }
    }
}

impl fmt::Display for ServiceSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.id, self.state)?;
        if self.restart_count > 0 {
            write!(f, " (restarts: {})", self.restart_count)?;
        }
        if let Some(dep) = &self.stalled_on {
            write!(f, " (stalled on {dep})")?;
        }
        if let Some(err) = &self.last_error {
            write!(f, " [{err}]")?;
        }
        Ok(())
    }
}

/// Write side of a service's status, owned by its controller.
#[derive(Debug, Clone)]
pub(crate) struct StatusCell {
    tx: Arc<watch::Sender<ServiceSnapshot>>,
}

impl StatusCell {
    pub(crate) fn new(id: &str) -> (Self, StatusWatch) {
        let (tx, rx) = watch::channel(ServiceSnapshot::new(id));
        (Self { tx: Arc::new(tx) }, StatusWatch { rx })
    }

    pub(crate) fn set_state(&self, state: ServiceState) {
        self.modify(|s| {
            s.state = state;
            if state.is_up() {
                s.reached_up = true;
            }
        });
    }

    pub(crate) fn modify(&self, f: impl FnOnce(&mut ServiceSnapshot)) {
        self.tx.send_modify(f);
    }
}

/// Read side of a service's status.
#[derive(Debug, Clone)]
pub struct StatusWatch {
    rx: watch::Receiver<ServiceSnapshot>,
}

impl StatusWatch {
    pub fn current(&self) -> ServiceSnapshot {
        self.rx.borrow().clone()
    }

    /// Wait until `pred` holds for the published snapshot and return it.
    /// Returns `None` if the controller went away first.
    pub async fn wait_until(
        &mut self,
        mut pred: impl FnMut(&ServiceSnapshot) -> bool,
    ) -> Option<ServiceSnapshot> {
        self.rx.wait_for(|s| pred(s)).await.ok().map(|s| s.clone())
    }

    pub async fn wait_for_state(&mut self, state: ServiceState) -> Option<ServiceSnapshot> {
        self.wait_until(|s| s.state == state).await
    }

    /// Next change; `None` once the controller is gone.
    pub async fn changed(&mut self) -> Option<ServiceSnapshot> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }

    /// Mark the current value as seen and return it.
    pub(crate) fn observe(&mut self) -> ServiceSnapshot {
        self.rx.borrow_and_update().clone()
    }
}
