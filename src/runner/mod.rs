// src/runner/mod.rs

//! Process execution layer.
//!
//! A [`Runner`] is a process description that can be launched any number
//! of times; each launch yields a [`ProcessHandle`] used to observe the exit
//! and to stop the attempt. The container runtime is an external
//! collaborator, so the stock runners here are deliberately plain:
//!
//! - [`process`]: OS process via `tokio::process`.
//! - [`inline`]: in-process async task, for services implemented in Rust.
//! - [`restart`]: the restart-policy wrapper that owns relaunching.

pub mod inline;
pub mod process;
pub mod restart;

use std::fmt;

use async_trait::async_trait;

pub use inline::InlineRunner;
pub use process::{run_once, ProcessRunner, ProcessSpec};
pub use restart::{RestartEvent, RestartHandle, RestartPolicy, RestartSettings, Restarter, Termination};

/// How one process attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    Success,
    /// Non-zero exit; `-1` when no exit code is available (e.g. signalled).
    Failed(i32),
}

impl ProcessOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ProcessOutcome::Success)
    }
}

impl fmt::Display for ProcessOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessOutcome::Success => f.write_str("exit code 0"),
            ProcessOutcome::Failed(code) => write!(f, "exit code {code}"),
        }
    }
}

/// A launchable process description.
#[async_trait]
pub trait Runner: Send + Sync {
    /// Launch one attempt.
    async fn start(&self) -> anyhow::Result<Box<dyn ProcessHandle>>;
}

/// A launched attempt.
#[async_trait]
pub trait ProcessHandle: Send {
    /// Resolve when the attempt exits. Must be cancel-safe.
    async fn wait(&mut self) -> anyhow::Result<ProcessOutcome>;

    /// Terminate the attempt. Calling it on an exited attempt is a no-op.
    async fn stop(&mut self) -> anyhow::Result<()>;
}
