// src/dag/mod.rs

//! Dependency graph and scheduling.
//!
//! - [`graph`] collects service descriptors and validates them into an
//!   acyclic [`ServiceGraph`] with a release order.
//! - [`gate`] lets a controller wait on its dependencies (start) and its
//!   dependents (teardown).
//! - [`scheduler`] spawns one controller per service and owns shutdown.

pub mod gate;
pub mod graph;
pub mod scheduler;

pub use gate::ReleaseGate;
pub use graph::{DependencyGraph, ServiceGraph};
pub use scheduler::Scheduler;
