// src/errors.rs

//! Crate-wide error types.
//!
//! - [`ValidationError`] is produced when the dependency graph is finalized.
//! - [`NodevisorError`] is the top-level error returned by the boot sequence
//!   and by the service lifecycle.
//!
//! Retry and store errors live next to their modules
//! ([`crate::retry::RetryError`], [`crate::store::StoreError`]) and convert
//! into [`NodevisorError`].

use thiserror::Error;

use crate::retry::RetryError;
use crate::store::StoreError;

/// Problems with the registered service set. Always fatal at startup.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("duplicate service id: {0}")]
    DuplicateId(String),

    #[error("service '{service}' depends on unknown service '{dependency}'")]
    UnknownDependency { service: String, dependency: String },

    #[error("service '{0}' cannot depend on itself")]
    SelfDependency(String),

    /// The ids along the cycle, starting and ending with the same id.
    #[error("cyclic dependency: {}", .0.join(" -> "))]
    CyclicDependency(Vec<String>),
}

#[derive(Error, Debug)]
pub enum NodevisorError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("invalid service graph: {0}")]
    Validation(#[from] ValidationError),

    #[error("pre hook of service '{service}' failed: {source}")]
    PreHook {
        service: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("post hook of service '{service}' failed: {source}")]
    PostHook {
        service: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("runner of service '{service}' failed: {source}")]
    Runner {
        service: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("condition of service '{service}' failed: {source}")]
    Condition {
        service: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("phase task '{task}' failed: {source}")]
    PhaseTask {
        task: String,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    Retry(#[from] RetryError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl NodevisorError {
    /// Errors that abort the whole supervisor instead of a single service.
    pub fn is_startup_fatal(&self) -> bool {
        matches!(
            self,
            NodevisorError::ConfigError(_)
                | NodevisorError::TomlError(_)
                | NodevisorError::IoError(_)
                | NodevisorError::Validation(_)
                | NodevisorError::PhaseTask { .. }
        )
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, NodevisorError>;
