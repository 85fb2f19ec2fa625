// src/phase/mod.rs

//! Boot-time phase tasks.
//!
//! Phase tasks are one-shot operations (mounts, sysctls, network setup)
//! that run strictly in declared order before any service is started. A
//! task that does not apply to the current execution mode is skipped; the
//! first failure aborts the sequence and is fatal for the supervisor. The
//! runner never retries; a task that needs retries does them itself.

pub mod task;

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, Instrument};

use crate::errors::{NodevisorError, Result};
use crate::retry::RetryPolicy;
use crate::store::KvStore;
use crate::types::ExecutionMode;

pub use task::{CommandTask, FnTask, ModeFilter};

#[async_trait]
pub trait PhaseTask: Send + Sync {
    fn id(&self) -> &str;

    fn applies_to(&self, _mode: ExecutionMode) -> bool {
        true
    }

    async fn run(&self, ctx: &PhaseContext) -> anyhow::Result<()>;
}

#[derive(Clone)]
pub struct PhaseContext {
    pub mode: ExecutionMode,
    pub store: Arc<dyn KvStore>,
    pub retry: RetryPolicy,
    pub cancel: CancellationToken,
}

/// What a completed (or interrupted) sequence did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PhaseReport {
    pub executed: Vec<String>,
    pub skipped: Vec<String>,
    /// Shutdown arrived before the sequence finished.
    pub interrupted: bool,
}

#[derive(Default)]
pub struct PhaseRunner {
    tasks: Vec<Box<dyn PhaseTask>>,
}

impl PhaseRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, task: impl PhaseTask + 'static) -> &mut Self {
        self.tasks.push(Box::new(task));
        self
    }

    pub fn with_task(mut self, task: impl PhaseTask + 'static) -> Self {
        self.push(task);
        self
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Run every applicable task once, in order.
    pub async fn run(&self, ctx: &PhaseContext) -> Result<PhaseReport> {
        let mut report = PhaseReport::default();

        for task in &self.tasks {
            if ctx.cancel.is_cancelled() {
                info!("boot sequence interrupted");
                report.interrupted = true;
                return Ok(report);
            }

            let id = task.id();
            if !task.applies_to(ctx.mode) {
                info!(task = id, mode = %ctx.mode, "skipping phase task");
                report.skipped.push(id.to_string());
                continue;
            }

            info!(task = id, "running phase task");
            let result = task
                .run(ctx)
                .instrument(info_span!("phase_task", task = id))
                .await;

            if let Err(source) = result {
                // A task cut short by shutdown is an interruption, not a boot failure.
                if ctx.cancel.is_cancelled() {
                    info!(task = id, error = %source, "phase task interrupted by shutdown");
                    report.interrupted = true;
                    return Ok(report);
                }
                return Err(NodevisorError::PhaseTask {
                    task: id.to_string(),
                    source,
                });
            }
            report.executed.push(id.to_string());
        }

        info!(
            executed = report.executed.len(),
            skipped = report.skipped.len(),
            "boot sequence complete"
        );
        Ok(report)
    }
}
