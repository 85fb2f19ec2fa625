// src/health/probe.rs

use std::future::Future;
use std::process::Stdio;

use anyhow::{bail, Context};
use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::process::Command;

/// A single fallible health check.
///
/// The monitor enforces the timeout by dropping the future, so
/// implementations must not leave work running after being dropped.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn check(&self) -> anyhow::Result<()>;
}

/// Healthy when a TCP connection to `address` succeeds.
#[derive(Debug, Clone)]
pub struct TcpProbe {
    address: String,
}

impl TcpProbe {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }
}

#[async_trait]
impl HealthProbe for TcpProbe {
    async fn check(&self) -> anyhow::Result<()> {
        let stream = TcpStream::connect(&self.address)
            .await
            .with_context(|| format!("connecting to {}", self.address))?;
        drop(stream);
        Ok(())
    }
}

/// Healthy when the command exits with status 0.
#[derive(Debug, Clone)]
pub struct CommandProbe {
    program: String,
    args: Vec<String>,
}

impl CommandProbe {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Run `script` through `sh -c`.
    pub fn shell(script: impl Into<String>) -> Self {
        Self::new("sh", vec!["-c".to_string(), script.into()])
    }
}

#[async_trait]
impl HealthProbe for CommandProbe {
    async fn check(&self) -> anyhow::Result<()> {
        let status = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await
            .with_context(|| format!("running health command '{}'", self.program))?;

        if !status.success() {
            bail!("health command exited with {status}");
        }
        Ok(())
    }
}

/// Adapts an async closure into a probe.
pub struct ProbeFn<F>(pub F);

#[async_trait]
impl<F, Fut> HealthProbe for ProbeFn<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn check(&self) -> anyhow::Result<()> {
        (self.0)().await
    }
}
