// src/dag/scheduler.rs

use std::collections::HashMap;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::dag::gate::ReleaseGate;
use crate::dag::graph::ServiceGraph;
use crate::service::{ServiceController, ServiceSnapshot, StatusWatch, SupervisorContext};

/// Runs one [`ServiceController`] per service of a validated graph.
///
/// Every controller is spawned on [`start`](Self::start); each one then
/// waits on its own [`ReleaseGate`] until all of its dependencies have come
/// up, so roots proceed immediately and dependents follow as their
/// dependencies reach `Running`. On [`stop`](Self::stop) the shared token is
/// cancelled and each controller delays its teardown until all of its
/// dependents are down, giving reverse-topological shutdown.
pub struct Scheduler {
    graph: ServiceGraph,
    ctx: SupervisorContext,
    stop: CancellationToken,
    watches: HashMap<String, StatusWatch>,
    tasks: JoinSet<()>,
    started: bool,
}

impl Scheduler {
    pub fn new(graph: ServiceGraph, ctx: SupervisorContext) -> Self {
        Self {
            graph,
            ctx,
            stop: CancellationToken::new(),
            watches: HashMap::new(),
            tasks: JoinSet::new(),
            started: false,
        }
    }

    pub fn graph(&self) -> &ServiceGraph {
        &self.graph
    }

    /// The supervisor-wide shutdown signal shared by all controllers.
    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    /// Spawn all controllers. Calling it twice is a no-op.
    pub fn start(&mut self) {
        if self.started {
            return;
        }
        self.started = true;

        let mut controllers = Vec::with_capacity(self.graph.len());
        for id in self.graph.release_order() {
            let Some(descriptor) = self.graph.descriptor(id) else {
                continue;
            };
            let (controller, watch) = ServiceController::new(descriptor.clone(), self.ctx.clone());
            self.watches.insert(id.clone(), watch);
            controllers.push(controller);
        }

        for controller in controllers {
            let id = controller.id().to_string();
            let gate = ReleaseGate::new(
                self.watches_for(self.graph.dependencies_of(&id)),
                self.watches_for(self.graph.dependents_of(&id)),
            );
            let span = info_span!("service", service = %id);
            let stop = self.stop.clone();
            self.tasks
                .spawn(controller.with_gate(gate).run(stop).instrument(span));
        }

        let roots: Vec<&str> = self.graph.roots().collect();
        info!(services = self.graph.len(), ?roots, "scheduler started");
    }

    fn watches_for(&self, ids: &[String]) -> Vec<(String, StatusWatch)> {
        ids.iter()
            .filter_map(|id| self.watches.get(id).map(|w| (id.clone(), w.clone())))
            .collect()
    }

    /// Status of one service.
    pub fn watch(&self, id: &str) -> Option<StatusWatch> {
        self.watches.get(id).cloned()
    }

    /// Every service's current status, in release order.
    pub fn snapshot(&self) -> Vec<ServiceSnapshot> {
        self.graph
            .release_order()
            .iter()
            .map(|id| match self.watches.get(id) {
                Some(w) => w.current(),
                None => ServiceSnapshot::new(id.clone()),
            })
            .collect()
    }

    /// Wait until every service is up or terminal.
    ///
    /// Services stalled behind a failed dependency never settle, so callers
    /// usually bound this with a timeout.
    pub async fn settled(&self) {
        for watch in self.watches.values() {
            let mut watch = watch.clone();
            let _ = watch
                .wait_until(|s| s.state.is_up() || s.state.is_terminal())
                .await;
        }
    }

    /// Signal every controller to stop and wait for all of them.
    pub async fn stop(mut self) -> Vec<ServiceSnapshot> {
        info!("stopping all services");
        self.stop.cancel();

        while let Some(res) = self.tasks.join_next().await {
            if let Err(e) = res {
                warn!(error = %e, "service controller task panicked");
            }
        }
        debug!("all service controllers finished");

        self.snapshot()
    }
}
