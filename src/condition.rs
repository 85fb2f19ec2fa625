// src/condition.rs

//! Start conditions: side-effect-free predicates over the environment that
//! gate a service's start independently of its dependencies.
//!
//! [`wait_for`] polls a condition with a cancellable sleep between checks.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::health::{HealthBoard, HealthStatus};

#[async_trait]
pub trait Condition: Send + Sync + fmt::Display {
    /// `Ok(false)` means "not yet"; errors are not retried by [`wait_for`].
    async fn check(&self) -> anyhow::Result<bool>;
}

/// Satisfied once `path` exists.
#[derive(Debug, Clone)]
pub struct FileExists {
    path: PathBuf,
}

impl FileExists {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl fmt::Display for FileExists {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "file {:?} to exist", self.path)
    }
}

#[async_trait]
impl Condition for FileExists {
    async fn check(&self) -> anyhow::Result<bool> {
        tokio::fs::try_exists(&self.path)
            .await
            .with_context(|| format!("checking whether {:?} exists", self.path))
    }
}

/// Satisfied while another service's health monitor reports `Healthy`.
#[derive(Debug, Clone)]
pub struct ServiceHealthy {
    service: String,
    board: HealthBoard,
}

impl ServiceHealthy {
    pub fn new(service: impl Into<String>, board: HealthBoard) -> Self {
        Self {
            service: service.into(),
            board,
        }
    }
}

impl fmt::Display for ServiceHealthy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "service {} to be healthy", self.service)
    }
}

#[async_trait]
impl Condition for ServiceHealthy {
    async fn check(&self) -> anyhow::Result<bool> {
        Ok(self
            .board
            .report_of(&self.service)
            .is_some_and(|r| r.status == HealthStatus::Healthy))
    }
}

/// Satisfied when every inner condition is.
pub struct AllOf {
    conditions: Vec<Box<dyn Condition>>,
}

impl AllOf {
    pub fn new(conditions: Vec<Box<dyn Condition>>) -> Self {
        Self { conditions }
    }
}

impl fmt::Display for AllOf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, c) in self.conditions.iter().enumerate() {
            if i > 0 {
                f.write_str(" and ")?;
            }
            write!(f, "{c}")?;
        }
        Ok(())
    }
}

#[async_trait]
impl Condition for AllOf {
    async fn check(&self) -> anyhow::Result<bool> {
        for c in &self.conditions {
            if !c.check().await? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// Poll `condition` every `interval` until it holds.
///
/// Returns `Ok(false)` if `cancel` fires first.
pub async fn wait_for(
    condition: &dyn Condition,
    interval: Duration,
    cancel: &CancellationToken,
) -> anyhow::Result<bool> {
    loop {
        if cancel.is_cancelled() {
            return Ok(false);
        }

        if condition.check().await? {
            debug!(%condition, "condition satisfied");
            return Ok(true);
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = cancel.cancelled() => return Ok(false),
        }
    }
}
