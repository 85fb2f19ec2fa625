// src/phase/task.rs

use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;
use serde::Deserialize;

use crate::runner::{run_once, ProcessSpec};
use crate::types::ExecutionMode;

use super::{PhaseContext, PhaseTask};

/// Execution modes a task applies to.
///
/// An empty `only` list means every mode; `skip` always wins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ModeFilter {
    #[serde(default)]
    pub only: Vec<ExecutionMode>,
    #[serde(default)]
    pub skip: Vec<ExecutionMode>,
}

impl ModeFilter {
    pub fn only(modes: impl IntoIterator<Item = ExecutionMode>) -> Self {
        Self {
            only: modes.into_iter().collect(),
            skip: Vec::new(),
        }
    }

    pub fn skip(modes: impl IntoIterator<Item = ExecutionMode>) -> Self {
        Self {
            only: Vec::new(),
            skip: modes.into_iter().collect(),
        }
    }

    pub fn allows(&self, mode: ExecutionMode) -> bool {
        if self.skip.contains(&mode) {
            return false;
        }
        self.only.is_empty() || self.only.contains(&mode)
    }
}

/// Phase task backed by an external command.
#[derive(Debug, Clone)]
pub struct CommandTask {
    id: String,
    spec: ProcessSpec,
    modes: ModeFilter,
}

impl CommandTask {
    pub fn new(id: impl Into<String>, spec: ProcessSpec) -> Self {
        Self {
            id: id.into(),
            spec,
            modes: ModeFilter::default(),
        }
    }

    pub fn with_modes(mut self, modes: ModeFilter) -> Self {
        self.modes = modes;
        self
    }
}

#[async_trait]
impl PhaseTask for CommandTask {
    fn id(&self) -> &str {
        &self.id
    }

    fn applies_to(&self, mode: ExecutionMode) -> bool {
        self.modes.allows(mode)
    }

    async fn run(&self, ctx: &PhaseContext) -> anyhow::Result<()> {
        run_once(&self.id, &self.spec, &ctx.cancel).await
    }
}

type TaskFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;
type TaskBody = Box<dyn Fn(PhaseContext) -> TaskFuture + Send + Sync>;

/// Phase task backed by a closure, for tasks implemented in Rust.
pub struct FnTask {
    id: String,
    modes: ModeFilter,
    body: TaskBody,
}

impl FnTask {
    pub fn new<F, Fut>(id: impl Into<String>, body: F) -> Self
    where
        F: Fn(PhaseContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            id: id.into(),
            modes: ModeFilter::default(),
            body: Box::new(move |ctx| -> TaskFuture { Box::pin(body(ctx)) }),
        }
    }

    pub fn with_modes(mut self, modes: ModeFilter) -> Self {
        self.modes = modes;
        self
    }
}

#[async_trait]
impl PhaseTask for FnTask {
    fn id(&self) -> &str {
        &self.id
    }

    fn applies_to(&self, mode: ExecutionMode) -> bool {
        self.modes.allows(mode)
    }

    async fn run(&self, ctx: &PhaseContext) -> anyhow::Result<()> {
        (self.body)(ctx.clone()).await
    }
}
