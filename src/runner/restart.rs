// src/runner/restart.rs

//! Restart-policy wrapper.
//!
//! [`Restarter`] owns a [`Runner`] and decides whether to relaunch it after
//! each exit:
//!
//! ```text
//! Forever      → relaunch after every exit (and every failed launch)
//! Once         → launch once; success or failure is terminal
//! UntilSuccess → relaunch after failures; a clean exit is terminal
//! ```
//!
//! Relaunches are separated by at least [`RestartSettings::delay`] so a
//! crashing process never loops at full speed. Progress is reported as
//! [`RestartEvent`]s over a channel; the terminal result is the return
//! value of [`Restarter::run`].

use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{ProcessOutcome, Runner};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RestartPolicy {
    Forever,
    Once,
    UntilSuccess,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        RestartPolicy::Once
    }
}

impl FromStr for RestartPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "forever" => Ok(RestartPolicy::Forever),
            "once" => Ok(RestartPolicy::Once),
            "until-success" | "until_success" => Ok(RestartPolicy::UntilSuccess),
            other => Err(format!(
                "invalid restart policy: {other} (expected \"forever\", \"once\" or \"until-success\")"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartSettings {
    pub policy: RestartPolicy,
    /// Minimum pause between an exit and the next launch.
    pub delay: Duration,
}

impl Default for RestartSettings {
    fn default() -> Self {
        Self {
            policy: RestartPolicy::Once,
            delay: Duration::from_secs(5),
        }
    }
}

impl RestartSettings {
    pub fn new(policy: RestartPolicy, delay: Duration) -> Self {
        Self { policy, delay }
    }
}

/// Progress notifications from the relaunch loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestartEvent {
    Launched { attempt: u32 },
    LaunchFailed { attempt: u32, error: String },
    Exited { attempt: u32, outcome: ProcessOutcome },
}

/// Why the relaunch loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// The policy is satisfied by a clean exit.
    Completed,
    /// The policy does not allow another attempt after a failure.
    Failed(String),
    /// [`RestartHandle::stop`] was called.
    Stopped,
}

/// Stops a running [`Restarter`] from outside.
#[derive(Debug, Clone)]
pub struct RestartHandle {
    cancel: CancellationToken,
}

impl RestartHandle {
    /// Terminate the current attempt and prevent any further launch.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

pub struct Restarter {
    service: String,
    runner: Box<dyn Runner>,
    settings: RestartSettings,
    cancel: CancellationToken,
}

impl Restarter {
    pub fn new(service: impl Into<String>, runner: Box<dyn Runner>, settings: RestartSettings) -> Self {
        Self {
            service: service.into(),
            runner,
            settings,
            cancel: CancellationToken::new(),
        }
    }

    pub fn handle(&self) -> RestartHandle {
        RestartHandle {
            cancel: self.cancel.clone(),
        }
    }

    /// Launch and relaunch according to the policy until it is satisfied,
    /// exhausted, or stopped.
    pub async fn run(self, events: mpsc::UnboundedSender<RestartEvent>) -> Termination {
        let mut attempt: u32 = 0;

        loop {
            if self.cancel.is_cancelled() {
                return Termination::Stopped;
            }
            attempt += 1;

            let result = match self.run_attempt(attempt, &events).await {
                Some(result) => result,
                None => return Termination::Stopped,
            };

            match (self.settings.policy, &result) {
                (RestartPolicy::Once, Ok(outcome)) if outcome.is_success() => {
                    return Termination::Completed;
                }
                (RestartPolicy::Once, Ok(outcome)) => {
                    return Termination::Failed(format!("process exited with {outcome}"));
                }
                (RestartPolicy::Once, Err(error)) => {
                    return Termination::Failed(error.clone());
                }
                (RestartPolicy::UntilSuccess, Ok(outcome)) if outcome.is_success() => {
                    return Termination::Completed;
                }
                _ => {}
            }

            info!(
                service = %self.service,
                attempt,
                delay = ?self.settings.delay,
                policy = ?self.settings.policy,
                "relaunching after delay"
            );

            tokio::select! {
                _ = sleep(self.settings.delay) => {}
                _ = self.cancel.cancelled() => return Termination::Stopped,
            }
        }
    }

    /// One launch and wait. `None` means the loop was stopped meanwhile.
    async fn run_attempt(
        &self,
        attempt: u32,
        events: &mpsc::UnboundedSender<RestartEvent>,
    ) -> Option<Result<ProcessOutcome, String>> {
        let launched = tokio::select! {
            res = self.runner.start() => res,
            _ = self.cancel.cancelled() => return None,
        };

        let mut handle = match launched {
            Ok(handle) => handle,
            Err(e) => {
                warn!(service = %self.service, attempt, error = %e, "failed to launch process");
                let error = format!("{e:#}");
                let _ = events.send(RestartEvent::LaunchFailed {
                    attempt,
                    error: error.clone(),
                });
                return Some(Err(error));
            }
        };

        debug!(service = %self.service, attempt, "process launched");
        let _ = events.send(RestartEvent::Launched { attempt });

        let exit = tokio::select! {
            res = handle.wait() => Some(res),
            _ = self.cancel.cancelled() => None,
        };

        match exit {
            None => {
                if let Err(e) = handle.stop().await {
                    warn!(service = %self.service, attempt, error = %e, "failed to stop process");
                }
                debug!(service = %self.service, attempt, "process stopped");
                None
            }
            Some(Ok(outcome)) => {
                info!(
                    service = %self.service,
                    attempt,
                    success = outcome.is_success(),
                    "process exited with {outcome}"
                );
                let _ = events.send(RestartEvent::Exited { attempt, outcome });
                Some(Ok(outcome))
            }
            Some(Err(e)) => {
                warn!(service = %self.service, attempt, error = %e, "lost track of process");
                let outcome = ProcessOutcome::Failed(-1);
                let _ = events.send(RestartEvent::Exited { attempt, outcome });
                Some(Err(format!("{e:#}")))
            }
        }
    }
}
