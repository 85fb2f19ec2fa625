// src/health/monitor.rs

use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{HealthProbe, HealthReport, HealthSettings, HealthStatus, HealthTracker, HealthWatch};

/// Runs one service's probe on a fixed interval and publishes the result.
///
/// The monitor is the only writer of its channel; any number of readers
/// can hold a [`HealthWatch`].
pub struct HealthMonitor {
    service: String,
    probe: Arc<dyn HealthProbe>,
    settings: HealthSettings,
    tracker: HealthTracker,
    tx: watch::Sender<HealthReport>,
}

impl HealthMonitor {
    pub fn new(
        service: impl Into<String>,
        probe: Arc<dyn HealthProbe>,
        settings: HealthSettings,
    ) -> (Self, HealthWatch) {
        let (tx, rx) = watch::channel(HealthReport::default());
        let monitor = Self {
            service: service.into(),
            probe,
            settings,
            tracker: HealthTracker::new(settings.threshold),
            tx,
        };
        (monitor, HealthWatch::new(rx))
    }

    /// Probe until `cancel` fires.
    pub async fn run(mut self, cancel: CancellationToken) {
        debug!(
            service = %self.service,
            interval = ?self.settings.interval,
            threshold = self.settings.threshold,
            "health monitor started"
        );

        if !self.settings.initial_delay.is_zero() {
            tokio::select! {
                _ = sleep(self.settings.initial_delay) => {}
                _ = cancel.cancelled() => return,
            }
        }

        loop {
            let outcome = tokio::select! {
                res = timeout(self.settings.timeout, self.probe.check()) => res,
                _ = cancel.cancelled() => break,
            };

            let changed = match outcome {
                Ok(Ok(())) => self.tracker.record_success(),
                Ok(Err(e)) => {
                    debug!(service = %self.service, error = %e, "health probe failed");
                    self.tracker.record_failure(e.to_string())
                }
                Err(_elapsed) => {
                    debug!(service = %self.service, timeout = ?self.settings.timeout, "health probe timed out");
                    self.tracker
                        .record_failure(format!("probe timed out after {:?}", self.settings.timeout))
                }
            };

            let report = self.tracker.report().clone();
            if changed {
                match report.status {
                    HealthStatus::Healthy => info!(service = %self.service, "service is healthy"),
                    HealthStatus::Degraded => warn!(
                        service = %self.service,
                        failures = report.consecutive_failures,
                        error = report.last_error.as_deref().unwrap_or(""),
                        "service is degraded"
                    ),
                    HealthStatus::Unknown => {}
                }
            }
            self.tx.send_replace(report);

            tokio::select! {
                _ = sleep(self.settings.interval) => {}
                _ = cancel.cancelled() => break,
            }
        }

        debug!(service = %self.service, "health monitor stopped");
    }
}
