// src/config/model.rs

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::health::HealthSettings;
use crate::retry::{BackoffKind, RetryPolicy};
use crate::runner::{RestartPolicy, RestartSettings};
use crate::types::ExecutionMode;

/// Configuration as read from the TOML file, before validation.
///
/// ```toml
/// [node]
/// mode = "bare"
/// store = "/var/lib/nodevisor/flags.toml"
///
/// [retry]
/// budget = "5m"
///
/// [[phase]]
/// id = "sysctls"
/// cmd = "sysctl --system"
/// skip_in = ["container"]
///
/// [service.etcd]
/// cmd = "etcd --data-dir /var/lib/etcd"
/// restart = "forever"
/// address = "127.0.0.1:2379"
/// health = { tcp = "127.0.0.1:2379" }
///
/// [service.bootstrap]
/// depends_on = ["etcd"]
/// provision = { key = "bootstrap/done", cmd = "gen-assets", skip_run_when_provisioned = true }
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub node: RawNodeSection,

    #[serde(default)]
    pub retry: RawRetrySection,

    /// Defaults for every service's health checks.
    #[serde(default)]
    pub health: HealthOverrides,

    /// Boot tasks, in execution order.
    #[serde(default)]
    pub phase: Vec<PhaseConfig>,

    /// Keys are service ids.
    #[serde(default)]
    pub service: BTreeMap<String, ServiceConfig>,
}

/// `[node]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct RawNodeSection {
    #[serde(default)]
    pub mode: ExecutionMode,

    /// TOML file for persisted flags; in-memory store when absent.
    #[serde(default)]
    pub store: Option<PathBuf>,

    #[serde(default = "default_condition_interval")]
    pub condition_interval: String,

    /// Grace period between SIGTERM and SIGKILL for service processes.
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout: String,

    /// Environment added to every service process.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

fn default_condition_interval() -> String {
    "1s".to_string()
}

fn default_stop_timeout() -> String {
    "10s".to_string()
}

impl Default for RawNodeSection {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::default(),
            store: None,
            condition_interval: default_condition_interval(),
            stop_timeout: default_stop_timeout(),
            env: BTreeMap::new(),
        }
    }
}

/// `[retry]` section: policy for store coordination in hooks.
#[derive(Debug, Clone, Deserialize)]
pub struct RawRetrySection {
    #[serde(default)]
    pub kind: BackoffKind,
    #[serde(default = "default_retry_unit")]
    pub unit: String,
    #[serde(default = "default_retry_jitter")]
    pub jitter: String,
    #[serde(default = "default_retry_max_delay")]
    pub max_delay: String,
    #[serde(default = "default_retry_budget")]
    pub budget: String,
}

fn default_retry_unit() -> String {
    "1s".to_string()
}

fn default_retry_jitter() -> String {
    "500ms".to_string()
}

fn default_retry_max_delay() -> String {
    "30s".to_string()
}

fn default_retry_budget() -> String {
    "5m".to_string()
}

impl Default for RawRetrySection {
    fn default() -> Self {
        Self {
            kind: BackoffKind::default(),
            unit: default_retry_unit(),
            jitter: default_retry_jitter(),
            max_delay: default_retry_max_delay(),
            budget: default_retry_budget(),
        }
    }
}

/// Optional health settings; unset fields fall back to the next level
/// (service → `[health]` → built-in defaults).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HealthOverrides {
    #[serde(default)]
    pub initial_delay: Option<String>,
    #[serde(default)]
    pub interval: Option<String>,
    #[serde(default)]
    pub timeout: Option<String>,
    #[serde(default)]
    pub threshold: Option<u32>,
}

/// `[[phase]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct PhaseConfig {
    pub id: String,
    pub cmd: String,
    /// Run only in these modes (all modes when empty).
    #[serde(default)]
    pub only_in: Vec<ExecutionMode>,
    #[serde(default)]
    pub skip_in: Vec<ExecutionMode>,
}

/// `[service.<id>]` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServiceConfig {
    /// Long-running command. A service without one finishes after its hooks.
    #[serde(default)]
    pub cmd: Option<String>,

    #[serde(default)]
    pub depends_on: Vec<String>,

    #[serde(default)]
    pub restart: RestartPolicy,

    #[serde(default)]
    pub restart_delay: Option<String>,

    /// Registered with the RPC registrar while running.
    #[serde(default)]
    pub address: Option<String>,

    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Variables removed from both `[node].env` and the inherited
    /// environment.
    #[serde(default)]
    pub env_drop: Vec<String>,

    #[serde(default)]
    pub working_dir: Option<PathBuf>,

    /// Command run before every activation.
    #[serde(default)]
    pub pre: Option<String>,

    /// Command run once after the first successful launch.
    #[serde(default)]
    pub post: Option<String>,

    #[serde(default)]
    pub wait_for_files: Vec<PathBuf>,

    /// Services whose health must be `Healthy` before this one starts.
    #[serde(default)]
    pub wait_for_healthy: Vec<String>,

    #[serde(default)]
    pub provision: Option<ProvisionConfig>,

    #[serde(default)]
    pub health: Option<ServiceHealthConfig>,
}

/// One-time provisioning guarded by a persisted flag.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProvisionConfig {
    pub key: String,
    #[serde(default)]
    pub cmd: Option<String>,
    /// Do not start `cmd` at all once provisioned.
    #[serde(default)]
    pub skip_run_when_provisioned: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServiceHealthConfig {
    #[serde(default)]
    pub tcp: Option<String>,
    #[serde(default)]
    pub cmd: Option<String>,
    #[serde(flatten)]
    pub settings: HealthOverrides,
}

/// Validated configuration. Built from [`RawConfigFile`] via `TryFrom`.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub node: NodeSettings,
    pub retry: RetryPolicy,
    pub health: HealthSettings,
    pub phases: Vec<PhaseConfig>,
    pub services: BTreeMap<String, ServiceSettings>,
}

#[derive(Debug, Clone)]
pub struct NodeSettings {
    pub mode: ExecutionMode,
    pub store: Option<PathBuf>,
    pub condition_interval: Duration,
    pub stop_timeout: Duration,
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeKind {
    Tcp(String),
    Command(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthCheck {
    pub probe: ProbeKind,
    pub settings: HealthSettings,
}

/// A service with every default applied.
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub id: String,
    pub cmd: Option<String>,
    pub depends_on: Vec<String>,
    pub restart: RestartSettings,
    pub address: Option<String>,
    /// `[node].env` minus `env_drop`, overlaid with the service's own `env`.
    pub env: BTreeMap<String, String>,
    pub env_drop: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub stop_timeout: Duration,
    pub pre: Option<String>,
    pub post: Option<String>,
    pub wait_for_files: Vec<PathBuf>,
    pub wait_for_healthy: Vec<String>,
    pub provision: Option<ProvisionConfig>,
    pub health: Option<HealthCheck>,
}

impl ServiceSettings {
    /// Minimal settings for a service running `cmd`.
    pub fn new(id: impl Into<String>, cmd: Option<String>) -> Self {
        Self {
            id: id.into(),
            cmd,
            depends_on: Vec::new(),
            restart: RestartSettings::new(RestartPolicy::default(), Duration::from_secs(5)),
            address: None,
            env: BTreeMap::new(),
            env_drop: Vec::new(),
            working_dir: None,
            stop_timeout: Duration::from_secs(10),
            pre: None,
            post: None,
            wait_for_files: Vec::new(),
            wait_for_healthy: Vec::new(),
            provision: None,
            health: None,
        }
    }
}
