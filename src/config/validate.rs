// src/config/validate.rs

//! Turns a [`RawConfigFile`] into a [`ConfigFile`].
//!
//! Only file-level rules live here. Graph rules (duplicate ids, unknown
//! dependencies, cycles) belong to the dependency graph's `finalize`.

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use crate::config::duration::parse_duration;
use crate::config::model::{
    ConfigFile, HealthCheck, HealthOverrides, NodeSettings, PhaseConfig, ProbeKind,
    RawConfigFile, RawRetrySection, ServiceConfig, ServiceSettings,
};
use crate::errors::{NodevisorError, Result};
use crate::health::HealthSettings;
use crate::retry::RetryPolicy;
use crate::runner::RestartSettings;

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = NodevisorError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        let node = NodeSettings {
            mode: raw.node.mode,
            store: raw.node.store,
            condition_interval: non_zero("[node].condition_interval", &raw.node.condition_interval)?,
            stop_timeout: non_zero("[node].stop_timeout", &raw.node.stop_timeout)?,
            env: raw.node.env,
        };

        let retry = retry_policy(&raw.retry)?;
        let health = health_settings("[health]", &raw.health, HealthSettings::default())?;

        validate_phases(&raw.phase)?;

        let mut services = BTreeMap::new();
        for (id, cfg) in raw.service {
            let settings = service_settings(&id, cfg, &node, health)?;
            services.insert(id, settings);
        }

        Ok(ConfigFile {
            node,
            retry,
            health,
            phases: raw.phase,
            services,
        })
    }
}

fn duration(field: &str, value: &str) -> Result<Duration> {
    parse_duration(value).map_err(|e| NodevisorError::ConfigError(format!("{field}: {e}")))
}

fn non_zero(field: &str, value: &str) -> Result<Duration> {
    let d = duration(field, value)?;
    if d.is_zero() {
        return Err(NodevisorError::ConfigError(format!(
            "{field} must be greater than zero"
        )));
    }
    Ok(d)
}

fn retry_policy(raw: &RawRetrySection) -> Result<RetryPolicy> {
    Ok(RetryPolicy {
        kind: raw.kind,
        unit: non_zero("[retry].unit", &raw.unit)?,
        jitter: duration("[retry].jitter", &raw.jitter)?,
        max_delay: non_zero("[retry].max_delay", &raw.max_delay)?,
        budget: non_zero("[retry].budget", &raw.budget)?,
    })
}

fn health_settings(
    section: &str,
    raw: &HealthOverrides,
    base: HealthSettings,
) -> Result<HealthSettings> {
    let mut settings = base;
    if let Some(v) = &raw.initial_delay {
        settings.initial_delay = duration(&format!("{section}.initial_delay"), v)?;
    }
    if let Some(v) = &raw.interval {
        settings.interval = non_zero(&format!("{section}.interval"), v)?;
    }
    if let Some(v) = &raw.timeout {
        settings.timeout = non_zero(&format!("{section}.timeout"), v)?;
    }
    if let Some(threshold) = raw.threshold {
        if threshold == 0 {
            return Err(NodevisorError::ConfigError(format!(
                "{section}.threshold must be >= 1 (got 0)"
            )));
        }
        settings.threshold = threshold;
    }
    Ok(settings)
}

fn validate_phases(phases: &[PhaseConfig]) -> Result<()> {
    let mut seen = HashSet::new();
    for phase in phases {
        if phase.id.trim().is_empty() {
            return Err(NodevisorError::ConfigError(
                "[[phase]] entries need a non-empty id".to_string(),
            ));
        }
        if !seen.insert(phase.id.as_str()) {
            return Err(NodevisorError::ConfigError(format!(
                "duplicate phase id '{}'",
                phase.id
            )));
        }
        if phase.cmd.trim().is_empty() {
            return Err(NodevisorError::ConfigError(format!(
                "phase '{}' has an empty cmd",
                phase.id
            )));
        }
    }
    Ok(())
}

fn service_settings(
    id: &str,
    cfg: ServiceConfig,
    node: &NodeSettings,
    health_defaults: HealthSettings,
) -> Result<ServiceSettings> {
    let section = format!("[service.{id}]");

    let restart_delay = match &cfg.restart_delay {
        Some(v) => non_zero(&format!("{section}.restart_delay"), v)?,
        None => RestartSettings::default().delay,
    };

    if let Some(p) = &cfg.provision {
        if p.key.trim().is_empty() {
            return Err(NodevisorError::ConfigError(format!(
                "{section}.provision.key must not be empty"
            )));
        }
    }

    let health = match &cfg.health {
        None => None,
        Some(h) => {
            let probe = match (&h.tcp, &h.cmd) {
                (Some(addr), None) => ProbeKind::Tcp(addr.clone()),
                (None, Some(cmd)) => ProbeKind::Command(cmd.clone()),
                (Some(_), Some(_)) => {
                    return Err(NodevisorError::ConfigError(format!(
                        "{section}.health: set either `tcp` or `cmd`, not both"
                    )));
                }
                (None, None) => {
                    return Err(NodevisorError::ConfigError(format!(
                        "{section}.health needs a `tcp` or `cmd` probe"
                    )));
                }
            };
            let settings = health_settings(&format!("{section}.health"), &h.settings, health_defaults)?;
            Some(HealthCheck { probe, settings })
        }
    };

    let mut env: BTreeMap<String, String> = node
        .env
        .iter()
        .filter(|(k, _)| !cfg.env_drop.iter().any(|d| d.eq_ignore_ascii_case(k)))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    env.extend(cfg.env);

    Ok(ServiceSettings {
        id: id.to_string(),
        cmd: cfg.cmd,
        depends_on: cfg.depends_on,
        restart: RestartSettings::new(cfg.restart, restart_delay),
        address: cfg.address,
        env,
        env_drop: cfg.env_drop,
        working_dir: cfg.working_dir,
        stop_timeout: node.stop_timeout,
        pre: cfg.pre,
        post: cfg.post,
        wait_for_files: cfg.wait_for_files,
        wait_for_healthy: cfg.wait_for_healthy,
        provision: cfg.provision,
        health,
    })
}
