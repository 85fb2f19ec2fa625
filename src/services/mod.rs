// src/services/mod.rs

//! Concrete [`Service`](crate::service::Service) implementations.

pub mod command;

pub use command::CommandService;

use crate::config::ConfigFile;
use crate::dag::DependencyGraph;
use crate::service::ServiceDescriptor;

/// Register every `[service.<id>]` section as a [`CommandService`].
pub fn graph_from_config(cfg: &ConfigFile) -> DependencyGraph {
    let mut graph = DependencyGraph::new();
    for settings in cfg.services.values() {
        graph.register(ServiceDescriptor::new(CommandService::new(settings.clone())));
    }
    graph
}
