// src/runner/process.rs

//! OS process runner.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{ProcessHandle, ProcessOutcome, Runner};

/// Everything needed to launch one process.
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Added on top of the supervisor's own environment.
    pub env: BTreeMap<String, String>,
    /// Inherited variables the child must not see, matched ignoring case.
    pub env_remove: Vec<String>,
    pub working_dir: Option<PathBuf>,
    /// Grace period between SIGTERM and SIGKILL when stopping.
    pub stop_timeout: Duration,
}

impl ProcessSpec {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            env: BTreeMap::new(),
            env_remove: Vec::new(),
            working_dir: None,
            stop_timeout: Duration::from_secs(10),
        }
    }

    /// Run `script` through `sh -c`.
    pub fn shell(script: impl Into<String>) -> Self {
        Self::new("sh", vec!["-c".to_string(), script.into()])
    }
}

#[derive(Debug, Clone)]
pub struct ProcessRunner {
    service: String,
    spec: ProcessSpec,
}

impl ProcessRunner {
    pub fn new(service: impl Into<String>, spec: ProcessSpec) -> Self {
        Self {
            service: service.into(),
            spec,
        }
    }
}

#[async_trait]
impl Runner for ProcessRunner {
    async fn start(&self) -> Result<Box<dyn ProcessHandle>> {
        debug!(
            service = %self.service,
            program = %self.spec.program,
            args = ?self.spec.args,
            "starting process"
        );

        let mut cmd = Command::new(&self.spec.program);
        cmd.args(&self.spec.args);
        if !self.spec.env_remove.is_empty() {
            // Names match case-insensitively: `http_proxy` also drops `HTTP_PROXY`.
            for (key, _) in std::env::vars_os() {
                let dropped = key
                    .to_str()
                    .is_some_and(|k| self.spec.env_remove.iter().any(|r| r.eq_ignore_ascii_case(k)));
                if dropped {
                    cmd.env_remove(&key);
                }
            }
        }
        cmd.envs(&self.spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = &self.spec.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd
            .spawn()
            .with_context(|| format!("spawning '{}' for service '{}'", self.spec.program, self.service))?;

        if let Some(stdout) = child.stdout.take() {
            forward_lines(self.service.clone(), "stdout", stdout);
        }
        if let Some(stderr) = child.stderr.take() {
            forward_lines(self.service.clone(), "stderr", stderr);
        }

        Ok(Box::new(ProcessChild {
            service: self.service.clone(),
            child,
            stop_timeout: self.spec.stop_timeout,
            exited: None,
        }))
    }
}

/// Run `spec` once to completion; a non-zero exit is an error. Used for
/// hooks and phase tasks, which are not supervised.
pub async fn run_once(label: &str, spec: &ProcessSpec, cancel: &CancellationToken) -> Result<()> {
    let runner = ProcessRunner::new(label, spec.clone());
    let mut handle = runner.start().await?;

    let outcome = tokio::select! {
        res = handle.wait() => res?,
        _ = cancel.cancelled() => {
            handle.stop().await?;
            bail!("'{label}' interrupted by shutdown");
        }
    };

    if !outcome.is_success() {
        bail!("'{}' exited with {outcome}", spec.program);
    }
    Ok(())
}

/// Drain a pipe so the child never blocks on a full buffer; lines are
/// logged at debug.
fn forward_lines<R>(service: String, stream: &'static str, pipe: R)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(pipe).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!(service = %service, stream, "{}", line);
        }
    });
}

struct ProcessChild {
    service: String,
    child: Child,
    stop_timeout: Duration,
    exited: Option<ProcessOutcome>,
}

#[async_trait]
impl ProcessHandle for ProcessChild {
    async fn wait(&mut self) -> Result<ProcessOutcome> {
        if let Some(outcome) = self.exited {
            return Ok(outcome);
        }

        let status = self
            .child
            .wait()
            .await
            .with_context(|| format!("waiting for process of service '{}'", self.service))?;

        let outcome = if status.success() {
            ProcessOutcome::Success
        } else {
            ProcessOutcome::Failed(status.code().unwrap_or(-1))
        };
        self.exited = Some(outcome);
        Ok(outcome)
    }

    async fn stop(&mut self) -> Result<()> {
        if self.exited.is_some() || self.child.try_wait()?.is_some() {
            return Ok(());
        }

        terminate(&mut self.child);

        match tokio::time::timeout(self.stop_timeout, self.child.wait()).await {
            Ok(res) => {
                res.with_context(|| format!("waiting for service '{}' to stop", self.service))?;
            }
            Err(_) => {
                warn!(
                    service = %self.service,
                    timeout = ?self.stop_timeout,
                    "process did not stop in time; killing"
                );
                self.child.kill().await?;
            }
        }

        self.exited = Some(ProcessOutcome::Failed(-1));
        Ok(())
    }
}

#[cfg(unix)]
fn terminate(child: &mut Child) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    if let Some(pid) = child.id() {
        if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            debug!(pid, error = %e, "SIGTERM failed");
        }
    }
}

#[cfg(not(unix))]
fn terminate(child: &mut Child) {
    let _ = child.start_kill();
}
