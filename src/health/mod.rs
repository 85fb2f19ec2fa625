// src/health/mod.rs

//! Periodic health probing.
//!
//! Health is observable metadata only: the monitor never stops or restarts
//! the supervised process. The pieces:
//!
//! - [`HealthTracker`]: pure threshold state machine (no Tokio, no IO).
//! - [`monitor::HealthMonitor`]: async loop running a probe on an interval
//!   and publishing the tracker's report through a `watch` channel.
//! - [`HealthWatch`]: read side of that channel.
//! - [`HealthBoard`]: shared id → [`HealthWatch`] map for operators and
//!   for conditions that wait on another service's health.
//! - [`probe`]: probe trait and stock probes.

pub mod monitor;
pub mod probe;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime};

use tokio::sync::watch;

pub use monitor::HealthMonitor;
pub use probe::{CommandProbe, HealthProbe, ProbeFn, TcpProbe};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthSettings {
    /// Delay between launch and the first probe.
    pub initial_delay: Duration,
    pub interval: Duration,
    /// A probe running longer than this counts as a failure.
    pub timeout: Duration,
    /// Consecutive failures before the status becomes `Degraded`.
    pub threshold: u32,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            interval: Duration::from_secs(1),
            timeout: Duration::from_millis(500),
            threshold: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    /// No probe has completed yet.
    Unknown,
    Healthy,
    Degraded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
    pub checked_at: Option<SystemTime>,
}

impl Default for HealthReport {
    fn default() -> Self {
        Self {
            status: HealthStatus::Unknown,
            consecutive_failures: 0,
            last_error: None,
            checked_at: None,
        }
    }
}

/// Threshold logic shared by the monitor and its tests.
#[derive(Debug, Clone)]
pub struct HealthTracker {
    threshold: u32,
    report: HealthReport,
}

impl HealthTracker {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            report: HealthReport::default(),
        }
    }

    pub fn report(&self) -> &HealthReport {
        &self.report
    }

    /// Returns `true` if the status changed.
    pub fn record_success(&mut self) -> bool {
        let previous = self.report.status;
        self.report.status = HealthStatus::Healthy;
        self.report.consecutive_failures = 0;
        self.report.last_error = None;
        self.report.checked_at = Some(SystemTime::now());
        previous != self.report.status
    }

    /// Returns `true` if the status changed.
    pub fn record_failure(&mut self, error: impl Into<String>) -> bool {
        let previous = self.report.status;
        self.report.consecutive_failures = self.report.consecutive_failures.saturating_add(1);
        self.report.last_error = Some(error.into());
        self.report.checked_at = Some(SystemTime::now());
        if self.report.consecutive_failures >= self.threshold {
            self.report.status = HealthStatus::Degraded;
        }
        previous != self.report.status
    }
}

/// Read side of a service's published health.
#[derive(Debug, Clone)]
pub struct HealthWatch {
    rx: watch::Receiver<HealthReport>,
}

impl HealthWatch {
    pub(crate) fn new(rx: watch::Receiver<HealthReport>) -> Self {
        Self { rx }
    }

    pub fn current(&self) -> HealthReport {
        self.rx.borrow().clone()
    }

    /// Wait until the next published report. Returns `None` once the
    /// monitor is gone.
    pub async fn changed(&mut self) -> Option<HealthReport> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }

    /// Wait until the status equals `status`. Returns `false` if the
    /// monitor went away first.
    pub async fn wait_for_status(&mut self, status: HealthStatus) -> bool {
        self.rx.wait_for(|r| r.status == status).await.is_ok()
    }
}

/// Health of every monitored service, keyed by service id.
#[derive(Debug, Clone, Default)]
pub struct HealthBoard {
    inner: Arc<RwLock<HashMap<String, HealthWatch>>>,
}

impl HealthBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, service: &str, watch: HealthWatch) {
        let mut map = self.inner.write().unwrap_or_else(|e| e.into_inner());
        map.insert(service.to_string(), watch);
    }

    pub fn withdraw(&self, service: &str) {
        let mut map = self.inner.write().unwrap_or_else(|e| e.into_inner());
        map.remove(service);
    }

    pub fn watch_of(&self, service: &str) -> Option<HealthWatch> {
        let map = self.inner.read().unwrap_or_else(|e| e.into_inner());
        map.get(service).cloned()
    }

    pub fn report_of(&self, service: &str) -> Option<HealthReport> {
        self.watch_of(service).map(|w| w.current())
    }
}
