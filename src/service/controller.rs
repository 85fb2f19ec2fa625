// src/service/controller.rs

//! Drives one service through its lifecycle.
//!
//! The controller owns the service's [`ServiceSnapshot`] exclusively and
//! publishes every change through a `watch` channel. Other controllers
//! only ever observe it through their [`ReleaseGate`].

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};

use crate::condition::wait_for;
use crate::dag::gate::ReleaseGate;
use crate::errors::NodevisorError;
use crate::health::HealthMonitor;
use crate::runner::{RestartEvent, Restarter, Termination};

use super::state::StatusCell;
use super::{HookContext, ServiceDescriptor, ServiceState, StatusWatch, SupervisorContext};

pub struct ServiceController {
    descriptor: ServiceDescriptor,
    ctx: SupervisorContext,
    status: StatusCell,
    gate: ReleaseGate,
}

/// What the controller set up once the first launch succeeded; undone on
/// teardown.
#[derive(Default)]
struct Activation {
    launched: bool,
    registered: bool,
    health: Option<CancellationToken>,
}

impl ServiceController {
    pub fn new(descriptor: ServiceDescriptor, ctx: SupervisorContext) -> (Self, StatusWatch) {
        let (status, watch) = StatusCell::new(descriptor.id());
        let controller = Self {
            descriptor,
            ctx,
            status,
            gate: ReleaseGate::default(),
        };
        (controller, watch)
    }

    pub fn with_gate(mut self, gate: ReleaseGate) -> Self {
        self.gate = gate;
        self
    }

    pub fn id(&self) -> &str {
        self.descriptor.id()
    }

    /// Run the whole lifecycle. Returns once the service is in a terminal
    /// state. `stop` is the supervisor-wide shutdown signal.
    pub async fn run(mut self, stop: CancellationToken) {
        let id = self.descriptor.id().to_string();
        let service = self.descriptor.service().clone();

        // Pending
        let status = self.status.clone();
        let released = self
            .gate
            .dependencies_up(&stop, |dep| {
                warn!(service = %id, dependency = dep, "dependency will not come up; service is stalled");
                status.modify(|s| s.stalled_on = Some(dep.to_string()));
            })
            .await;
        if !released {
            self.finish(ServiceState::Stopped);
            return;
        }
        self.status.modify(|s| s.stalled_on = None);
        debug!(service = %id, "dependencies satisfied");

        // Waiting
        if let Some(condition) = service.condition(&self.ctx.health) {
            self.status.set_state(ServiceState::Waiting);
            info!(service = %id, "waiting for {condition}");

            match wait_for(condition.as_ref(), self.ctx.condition_interval, &stop).await {
                Ok(true) => {}
                Ok(false) => {
                    self.finish(ServiceState::Stopped);
                    return;
                }
                Err(source) => {
                    self.fail(NodevisorError::Condition {
                        service: id.clone(),
                        source,
                    });
                    return;
                }
            }
        }

        // Preparing
        self.status.set_state(ServiceState::Preparing);
        let mut hook_ctx = self.ctx.hook_context(&id, &stop);
        let prepared = match service.pre(&hook_ctx).await {
            Ok(prepared) => prepared,
            Err(_) if stop.is_cancelled() => {
                self.finish(ServiceState::Stopped);
                return;
            }
            Err(source) => {
                self.fail(NodevisorError::PreHook {
                    service: id.clone(),
                    source,
                });
                return;
            }
        };
        hook_ctx.prepared = Some(prepared);
        self.status.modify(|s| s.prepared = Some(prepared));

        // Starting
        self.status.set_state(ServiceState::Starting);
        let runner = match service.runner(&hook_ctx).await {
            Ok(Some(runner)) => runner,
            Ok(None) => {
                info!(service = %id, "nothing to run; service finished");
                self.run_post(&hook_ctx).await;
                self.finish(ServiceState::Finished);
                return;
            }
            Err(_) if stop.is_cancelled() => {
                self.finish(ServiceState::Stopped);
                return;
            }
            Err(source) => {
                self.fail(NodevisorError::Runner {
                    service: id.clone(),
                    source,
                });
                return;
            }
        };

        let restarter = Restarter::new(id.clone(), runner, service.restart());
        let handle = restarter.handle();
        let (events_tx, mut events) = mpsc::unbounded_channel();
        let mut supervised: JoinHandle<Termination> =
            tokio::spawn(restarter.run(events_tx).in_current_span());

        let mut activation = Activation::default();
        let joined = loop {
            tokio::select! {
                biased;
                Some(event) = events.recv() => {
                    self.on_event(event, &hook_ctx, &mut activation).await;
                }
                joined = &mut supervised => break joined,
                _ = stop.cancelled() => {
                    self.status.set_state(ServiceState::Stopping);
                    info!(service = %id, "stopping; waiting for dependents");
                    self.gate.dependents_down().await;
                    handle.stop();
                    break (&mut supervised).await;
                }
            }
        };

        // Events sent just before the wrapper returned.
        while let Ok(event) = events.try_recv() {
            self.on_event(event, &hook_ctx, &mut activation).await;
        }

        self.deactivate(&mut activation).await;

        if stop.is_cancelled() {
            self.finish(ServiceState::Stopped);
            return;
        }

        match joined {
            Ok(Termination::Completed) => {
                info!(service = %id, "process completed");
                self.finish(ServiceState::Finished);
            }
            Ok(Termination::Stopped) => self.finish(ServiceState::Stopped),
            Ok(Termination::Failed(reason)) => {
                self.fail(NodevisorError::Runner {
                    service: id.clone(),
                    source: anyhow::anyhow!(reason),
                });
            }
            Err(join_err) => {
                self.fail(NodevisorError::Runner {
                    service: id.clone(),
                    source: anyhow::anyhow!("restart loop panicked: {join_err}"),
                });
            }
        }
    }

    async fn on_event(&self, event: RestartEvent, hook_ctx: &HookContext, activation: &mut Activation) {
        match event {
            RestartEvent::Launched { attempt } => {
                self.status.modify(|s| s.restart_count = attempt.saturating_sub(1));
                if !activation.launched {
                    activation.launched = true;
                    self.status.set_state(ServiceState::Running);
                    info!(service = %hook_ctx.service, "service is running");
                    self.activate(hook_ctx, activation).await;
                } else {
                    info!(service = %hook_ctx.service, attempt, "service relaunched");
                }
            }
            RestartEvent::LaunchFailed { attempt, error } => {
                self.status.modify(|s| {
                    s.restart_count = attempt.saturating_sub(1);
                    s.last_error = Some(error);
                });
            }
            RestartEvent::Exited { outcome, .. } => {
                if !outcome.is_success() {
                    self.status
                        .modify(|s| s.last_error = Some(format!("process exited with {outcome}")));
                }
            }
        }
    }

    /// First successful launch: health monitor, registration, post hook.
    async fn activate(&self, hook_ctx: &HookContext, activation: &mut Activation) {
        let service = self.descriptor.service();
        let id = hook_ctx.service.as_str();

        if let Some((probe, settings)) = service.health() {
            let cancel = CancellationToken::new();
            let (monitor, mut health) = HealthMonitor::new(id, Arc::clone(&probe), settings);
            self.ctx.health.publish(id, health.clone());
            tokio::spawn(monitor.run(cancel.clone()).in_current_span());

            let status = self.status.clone();
            let forward_cancel = cancel.clone();
            tokio::spawn(
                async move {
                    loop {
                        tokio::select! {
                            report = health.changed() => match report {
                                Some(report) => status.modify(|s| s.health = report),
                                None => break,
                            },
                            _ = forward_cancel.cancelled() => break,
                        }
                    }
                }
                .in_current_span(),
            );
            activation.health = Some(cancel);
        }

        if let Some(address) = service.address() {
            match self.ctx.registrar.register(id, &address).await {
                Ok(()) => {
                    activation.registered = true;
                    info!(service = %id, %address, "registered with rpc registrar");
                }
                Err(e) => warn!(service = %id, error = %e, "failed to register service address"),
            }
        }

        self.run_post(hook_ctx).await;
    }

    /// Post hook failures are recorded but never fatal.
    async fn run_post(&self, hook_ctx: &HookContext) {
        let id = hook_ctx.service.as_str();
        if let Err(source) = self.descriptor.service().post(hook_ctx).await {
            let err = NodevisorError::PostHook {
                service: id.to_string(),
                source,
            };
            warn!(service = %id, error = %err, "post hook failed");
            self.status.modify(|s| s.last_error = Some(err.to_string()));
        }
    }

    async fn deactivate(&self, activation: &mut Activation) {
        let id = self.descriptor.id();

        if let Some(cancel) = activation.health.take() {
            cancel.cancel();
            self.ctx.health.withdraw(id);
        }

        if activation.registered {
            activation.registered = false;
            if let Err(e) = self.ctx.registrar.deregister(id).await {
                warn!(service = %id, error = %e, "failed to deregister service address");
            }
        }
    }

    fn finish(&self, state: ServiceState) {
        self.status.set_state(state);
        info!(service = %self.descriptor.id(), %state, "service reached terminal state");
    }

    fn fail(&self, err: NodevisorError) {
        error!(service = %self.descriptor.id(), error = %err, "service failed");
        self.status.modify(|s| {
            s.state = ServiceState::Failed;
            s.last_error = Some(err.to_string());
        });
    }
}
