// src/services/command.rs

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use tracing::info;

use crate::condition::{AllOf, Condition, FileExists, ServiceHealthy};
use crate::config::model::{ProbeKind, ServiceSettings};
use crate::health::{CommandProbe, HealthBoard, HealthProbe, HealthSettings, TcpProbe};
use crate::runner::{run_once, ProcessRunner, ProcessSpec, RestartSettings, Runner};
use crate::service::{HookContext, Prepared, Service};

/// A service described entirely by a `[service.<id>]` config section.
///
/// Activation:
///
/// 1. `pre`: if `provision` is set, check its flag and run `provision.cmd`
///    only when the flag is unset; then run the `pre` command.
/// 2. `runner`: `cmd` under the configured restart policy, or nothing when
///    there is no `cmd` (or provisioning asked to skip it).
/// 3. `post`: run the `post` command, then set the provisioning flag if
///    this activation did the provisioning.
#[derive(Debug, Clone)]
pub struct CommandService {
    settings: ServiceSettings,
}

impl CommandService {
    pub fn new(settings: ServiceSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &ServiceSettings {
        &self.settings
    }

    fn process_spec(&self, script: &str) -> ProcessSpec {
        let mut spec = ProcessSpec::shell(script);
        spec.env = self.settings.env.clone();
        spec.env_remove = self.settings.env_drop.clone();
        spec.working_dir = self.settings.working_dir.clone();
        spec.stop_timeout = self.settings.stop_timeout;
        spec
    }

    async fn run_hook(&self, label: &str, script: &str, ctx: &HookContext) -> anyhow::Result<()> {
        info!(service = %self.settings.id, hook = label, "running hook command");
        run_once(&self.settings.id, &self.process_spec(script), &ctx.cancel)
            .await
            .with_context(|| format!("{label} command of service '{}'", self.settings.id))
    }
}

#[async_trait]
impl Service for CommandService {
    fn id(&self) -> &str {
        &self.settings.id
    }

    fn depends_on(&self) -> Vec<String> {
        self.settings.depends_on.clone()
    }

    fn condition(&self, health: &HealthBoard) -> Option<Box<dyn Condition>> {
        let mut conditions: Vec<Box<dyn Condition>> = Vec::new();
        for path in &self.settings.wait_for_files {
            conditions.push(Box::new(FileExists::new(path.clone())));
        }
        for service in &self.settings.wait_for_healthy {
            conditions.push(Box::new(ServiceHealthy::new(service.clone(), health.clone())));
        }

        match conditions.len() {
            0 => None,
            1 => conditions.pop(),
            _ => Some(Box::new(AllOf::new(conditions))),
        }
    }

    async fn pre(&self, ctx: &HookContext) -> anyhow::Result<Prepared> {
        let mut prepared = Prepared::Fresh;

        if let Some(provision) = &self.settings.provision {
            let guard = ctx.guard(provision.key.clone());
            if guard.check(&ctx.cancel).await? {
                prepared = Prepared::AlreadyProvisioned;
            } else if let Some(cmd) = &provision.cmd {
                self.run_hook("provision", cmd, ctx).await?;
            }
        }

        if let Some(pre) = &self.settings.pre {
            self.run_hook("pre", pre, ctx).await?;
        }

        Ok(prepared)
    }

    async fn post(&self, ctx: &HookContext) -> anyhow::Result<()> {
        if let Some(post) = &self.settings.post {
            self.run_hook("post", post, ctx).await?;
        }

        if let Some(provision) = &self.settings.provision {
            if ctx.prepared == Some(Prepared::Fresh) {
                ctx.guard(provision.key.clone()).mark(&ctx.cancel).await?;
            }
        }
        Ok(())
    }

    async fn runner(&self, ctx: &HookContext) -> anyhow::Result<Option<Box<dyn Runner>>> {
        let skip = self
            .settings
            .provision
            .as_ref()
            .is_some_and(|p| p.skip_run_when_provisioned && ctx.is_already_provisioned());
        if skip {
            return Ok(None);
        }

        Ok(self.settings.cmd.as_deref().map(|cmd| {
            Box::new(ProcessRunner::new(self.settings.id.clone(), self.process_spec(cmd)))
                as Box<dyn Runner>
        }))
    }

    fn restart(&self) -> RestartSettings {
        self.settings.restart
    }

    fn health(&self) -> Option<(Arc<dyn HealthProbe>, HealthSettings)> {
        let check = self.settings.health.as_ref()?;
        let probe: Arc<dyn HealthProbe> = match &check.probe {
            ProbeKind::Tcp(addr) => Arc::new(TcpProbe::new(addr.clone())),
            ProbeKind::Command(cmd) => Arc::new(CommandProbe::shell(cmd.clone())),
        };
        Some((probe, check.settings))
    }

    fn address(&self) -> Option<String> {
        self.settings.address.clone()
    }
}
