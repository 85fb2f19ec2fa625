#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use nodevisor::config::{ConfigFile, PhaseConfig, RawConfigFile, ServiceConfig, ServiceHealthConfig};
use nodevisor::dag::{DependencyGraph, ServiceGraph};
use nodevisor::retry::RetryPolicy;
use nodevisor::runner::RestartPolicy;
use nodevisor::service::{Service, ServiceDescriptor, SupervisorContext};
use nodevisor::store::KvStore;
use nodevisor::types::ExecutionMode;

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile::default(),
        }
    }

    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.config.node.mode = mode;
        self
    }

    pub fn with_node_env(mut self, key: &str, value: &str) -> Self {
        self.config.node.env.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_service(mut self, id: &str, service: ServiceConfig) -> Self {
        self.config.service.insert(id.to_string(), service);
        self
    }

    pub fn with_phase(mut self, id: &str, cmd: &str) -> Self {
        self.config.phase.push(PhaseConfig {
            id: id.to_string(),
            cmd: cmd.to_string(),
            only_in: Vec::new(),
            skip_in: Vec::new(),
        });
        self
    }

    pub fn raw(self) -> RawConfigFile {
        self.config
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `ServiceConfig`.
pub struct ServiceConfigBuilder {
    service: ServiceConfig,
}

impl ServiceConfigBuilder {
    pub fn new(cmd: &str) -> Self {
        Self {
            service: ServiceConfig {
                cmd: Some(cmd.to_string()),
                ..ServiceConfig::default()
            },
        }
    }

    /// A service with hooks only.
    pub fn without_cmd() -> Self {
        Self {
            service: ServiceConfig::default(),
        }
    }

    pub fn after(mut self, dep: &str) -> Self {
        self.service.depends_on.push(dep.to_string());
        self
    }

    pub fn restart(mut self, policy: RestartPolicy) -> Self {
        self.service.restart = policy;
        self
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.service.env.insert(key.to_string(), value.to_string());
        self
    }

    pub fn drop_env(mut self, key: &str) -> Self {
        self.service.env_drop.push(key.to_string());
        self
    }

    pub fn health_tcp(mut self, addr: &str) -> Self {
        self.service.health = Some(ServiceHealthConfig {
            tcp: Some(addr.to_string()),
            ..ServiceHealthConfig::default()
        });
        self
    }

    pub fn build(self) -> ServiceConfig {
        self.service
    }
}

/// Finalize a graph made of `services`, panicking on validation errors.
pub fn graph_of(services: Vec<ServiceDescriptor>) -> ServiceGraph {
    let mut graph = DependencyGraph::new();
    for descriptor in services {
        graph.register(descriptor);
    }
    graph.finalize().expect("service graph should be valid")
}

/// Shorthand for `ServiceDescriptor::new`.
pub fn svc(service: impl Service) -> ServiceDescriptor {
    ServiceDescriptor::new(service)
}

/// Retry policy with small, jitter-free steps.
pub fn fast_retry(budget: Duration) -> RetryPolicy {
    RetryPolicy::constant(budget).with_unit(Duration::from_millis(10))
}

/// Supervisor context with a short condition poll interval.
pub fn test_context(store: Arc<dyn KvStore>) -> SupervisorContext {
    SupervisorContext::new(ExecutionMode::Bare)
        .with_store(store)
        .with_retry(fast_retry(Duration::from_secs(1)))
        .with_condition_interval(Duration::from_millis(10))
}
