// src/dag/graph.rs

use std::collections::{HashMap, HashSet};

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use petgraph::visit::{depth_first_search, Control, DfsEvent};
use tracing::debug;

use crate::errors::ValidationError;
use crate::service::ServiceDescriptor;

/// Collects service descriptors until [`finalize`](Self::finalize).
///
/// Registration never fails by itself; duplicate ids, unknown or
/// self-referencing dependencies and cycles are all reported by
/// `finalize`, before any service starts.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    descriptors: Vec<ServiceDescriptor>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, descriptor: ServiceDescriptor) -> &mut Self {
        debug!(service = %descriptor.id(), deps = ?descriptor.depends_on(), "service registered");
        self.descriptors.push(descriptor);
        self
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Validate the registered set and compute the release order.
    pub fn finalize(self) -> Result<ServiceGraph, ValidationError> {
        let mut seen = HashSet::new();
        for d in &self.descriptors {
            if !seen.insert(d.id()) {
                return Err(ValidationError::DuplicateId(d.id().to_string()));
            }
        }

        for d in &self.descriptors {
            for dep in d.depends_on() {
                if dep == d.id() {
                    return Err(ValidationError::SelfDependency(d.id().to_string()));
                }
                if !seen.contains(dep.as_str()) {
                    return Err(ValidationError::UnknownDependency {
                        service: d.id().to_string(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        // Edge direction: dependency -> dependent, so a topological order
        // is a valid release order.
        let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
        for d in &self.descriptors {
            graph.add_node(d.id());
        }
        for d in &self.descriptors {
            for dep in d.depends_on() {
                graph.add_edge(dep.as_str(), d.id(), ());
            }
        }

        if let Some(cycle) = find_cycle(&graph) {
            return Err(ValidationError::CyclicDependency(cycle));
        }

        let order: Vec<String> = toposort(&graph, None)
            .map_err(|c| ValidationError::CyclicDependency(vec![c.node_id().to_string()]))?
            .into_iter()
            .map(str::to_string)
            .collect();

        let mut dependents: HashMap<String, Vec<String>> = HashMap::new();
        for id in &order {
            let mut ds: Vec<String> = graph
                .neighbors_directed(id.as_str(), petgraph::Direction::Outgoing)
                .map(str::to_string)
                .collect();
            ds.sort();
            dependents.insert(id.clone(), ds);
        }

        let descriptors = self
            .descriptors
            .into_iter()
            .map(|d| (d.id().to_string(), d))
            .collect();

        Ok(ServiceGraph {
            order,
            descriptors,
            dependents,
        })
    }
}

/// Depth-first search; a back edge closes a cycle. The cycle is returned in
/// "depends on" reading order, starting and ending with the same id.
fn find_cycle(graph: &DiGraphMap<&str, ()>) -> Option<Vec<String>> {
    let mut parent: HashMap<&str, &str> = HashMap::new();

    let back_edge = depth_first_search(graph, graph.nodes(), |event| match event {
        DfsEvent::TreeEdge(u, v) => {
            parent.insert(v, u);
            Control::Continue
        }
        DfsEvent::BackEdge(u, v) => Control::Break((u, v)),
        _ => Control::Continue,
    })
    .break_value()?;

    // Tree path v -> ... -> u, then the back edge u -> v. Edges point from a
    // dependency to its dependent, so reverse it to read "depends on".
    let (u, v) = back_edge;
    let mut path = vec![u];
    let mut cur = u;
    while cur != v {
        cur = parent.get(cur).copied()?;
        path.push(cur);
    }
    // path = [u, ..., v]; prepend v to close the cycle.
    let mut cycle = Vec::with_capacity(path.len() + 1);
    cycle.push(v.to_string());
    cycle.extend(path.into_iter().map(str::to_string));
    Some(cycle)
}

/// A validated, acyclic service set.
#[derive(Debug, Clone)]
pub struct ServiceGraph {
    order: Vec<String>,
    descriptors: HashMap<String, ServiceDescriptor>,
    dependents: HashMap<String, Vec<String>>,
}

impl ServiceGraph {
    /// Every id, dependencies before dependents.
    pub fn release_order(&self) -> &[String] {
        &self.order
    }

    pub fn descriptor(&self, id: &str) -> Option<&ServiceDescriptor> {
        self.descriptors.get(id)
    }

    /// Direct dependencies of `id`.
    pub fn dependencies_of(&self, id: &str) -> &[String] {
        self.descriptors
            .get(id)
            .map(|d| d.depends_on())
            .unwrap_or(&[])
    }

    /// Direct dependents of `id`.
    pub fn dependents_of(&self, id: &str) -> &[String] {
        self.dependents
            .get(id)
            .map(|d| d.as_slice())
            .unwrap_or(&[])
    }

    /// Services with no dependencies; released immediately on start.
    pub fn roots(&self) -> impl Iterator<Item = &str> {
        self.order
            .iter()
            .map(String::as_str)
            .filter(|id| self.dependencies_of(id).is_empty())
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
