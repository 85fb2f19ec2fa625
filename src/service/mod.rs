// src/service/mod.rs

//! Services and their lifecycle.
//!
//! A [`Service`] is the capability set one system service implements; only
//! `id` and `runner` are mandatory, everything else has a no-op default.
//! Services are registered into the dependency graph wrapped in a
//! [`ServiceDescriptor`], and each one is driven at runtime by its own
//! [`ServiceController`].

pub mod controller;
pub mod provision;
pub mod state;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::condition::Condition;
use crate::health::{HealthBoard, HealthProbe, HealthSettings};
use crate::registrar::{Registrar, RouteTable};
use crate::retry::RetryPolicy;
use crate::runner::{RestartSettings, Runner};
use crate::store::{KvStore, MemoryStore};
use crate::types::ExecutionMode;

pub use controller::ServiceController;
pub use provision::ProvisionGuard;
pub use state::{ServiceSnapshot, ServiceState, StatusWatch};

/// Result of a pre hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prepared {
    /// The one-time work ran in this activation.
    Fresh,
    /// A persisted flag said the work was already done; it was skipped.
    AlreadyProvisioned,
}

/// What hooks and runner factories get to work with.
#[derive(Clone)]
pub struct HookContext {
    pub service: String,
    pub mode: ExecutionMode,
    pub store: Arc<dyn KvStore>,
    /// Default policy for store coordination.
    pub retry: RetryPolicy,
    /// Fires on supervisor shutdown.
    pub cancel: CancellationToken,
    /// `None` inside the pre hook itself.
    pub prepared: Option<Prepared>,
}

impl HookContext {
    /// Guard for a one-time action, backed by this context's store.
    pub fn guard(&self, key: impl Into<String>) -> ProvisionGuard {
        ProvisionGuard::new(key, self.store.clone(), self.retry)
    }

    pub fn is_already_provisioned(&self) -> bool {
        self.prepared == Some(Prepared::AlreadyProvisioned)
    }
}

#[async_trait]
pub trait Service: Send + Sync + 'static {
    fn id(&self) -> &str;

    fn depends_on(&self) -> Vec<String> {
        Vec::new()
    }

    /// Start gate evaluated after dependencies are satisfied. Built once per
    /// activation.
    fn condition(&self, _health: &HealthBoard) -> Option<Box<dyn Condition>> {
        None
    }

    /// Runs once per activation before the runner is built. An error is
    /// fatal for this service.
    async fn pre(&self, _ctx: &HookContext) -> anyhow::Result<Prepared> {
        Ok(Prepared::Fresh)
    }

    /// Runs once after the first successful launch. An error is reported
    /// but does not stop the service.
    async fn post(&self, _ctx: &HookContext) -> anyhow::Result<()> {
        Ok(())
    }

    /// Produce the process to supervise. `None` means there is nothing to
    /// run and the service is complete.
    async fn runner(&self, ctx: &HookContext) -> anyhow::Result<Option<Box<dyn Runner>>>;

    fn restart(&self) -> RestartSettings {
        RestartSettings::default()
    }

    fn health(&self) -> Option<(Arc<dyn HealthProbe>, HealthSettings)> {
        None
    }

    /// Address registered with the RPC registrar while running.
    fn address(&self) -> Option<String> {
        None
    }
}

/// A registered service. Cheap to clone.
#[derive(Clone)]
pub struct ServiceDescriptor {
    id: String,
    depends_on: Vec<String>,
    service: Arc<dyn Service>,
}

impl ServiceDescriptor {
    pub fn new(service: impl Service) -> Self {
        Self::from_arc(Arc::new(service))
    }

    pub fn from_arc(service: Arc<dyn Service>) -> Self {
        Self {
            id: service.id().to_string(),
            depends_on: service.depends_on(),
            service,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn depends_on(&self) -> &[String] {
        &self.depends_on
    }

    pub fn service(&self) -> &Arc<dyn Service> {
        &self.service
    }
}

impl fmt::Debug for ServiceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceDescriptor")
            .field("id", &self.id)
            .field("depends_on", &self.depends_on)
            .finish()
    }
}

/// Shared collaborators every controller needs.
#[derive(Clone)]
pub struct SupervisorContext {
    pub mode: ExecutionMode,
    pub store: Arc<dyn KvStore>,
    pub retry: RetryPolicy,
    pub health: HealthBoard,
    pub registrar: Arc<dyn Registrar>,
    /// Poll interval for start conditions.
    pub condition_interval: Duration,
}

impl SupervisorContext {
    pub fn new(mode: ExecutionMode) -> Self {
        Self {
            mode,
            store: Arc::new(MemoryStore::new()),
            retry: RetryPolicy::exponential(Duration::from_secs(300)),
            health: HealthBoard::new(),
            registrar: Arc::new(RouteTable::new()),
            condition_interval: Duration::from_secs(1),
        }
    }

    pub fn with_store(mut self, store: Arc<dyn KvStore>) -> Self {
        self.store = store;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_registrar(mut self, registrar: Arc<dyn Registrar>) -> Self {
        self.registrar = registrar;
        self
    }

    pub fn with_condition_interval(mut self, interval: Duration) -> Self {
        self.condition_interval = interval;
        self
    }

    pub(crate) fn hook_context(&self, service: &str, cancel: &CancellationToken) -> HookContext {
        HookContext {
            service: service.to_string(),
            mode: self.mode,
            store: self.store.clone(),
            retry: self.retry,
            cancel: cancel.clone(),
            prepared: None,
        }
    }
}
