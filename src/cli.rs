// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::config::loader::default_config_path;
use crate::types::ExecutionMode;

/// Command-line arguments for `nodevisor`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "nodevisor",
    version,
    about = "Boot and supervise the services of a cluster node.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    #[arg(long, value_name = "PATH", default_value_os_t = default_config_path())]
    pub config: PathBuf,

    /// Override `[node].mode` (bare, cloud, container).
    #[arg(long, value_name = "MODE")]
    pub mode: Option<ExecutionMode>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `NODEVISOR_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Also append logs to this file.
    #[arg(long, value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// Parse + validate, print phases, services and release order, but
    /// don't execute anything.
    #[arg(long)]
    pub dry_run: bool,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
