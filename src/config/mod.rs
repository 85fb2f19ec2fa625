// src/config/mod.rs

//! Configuration loading and validation.
//!
//! - `model.rs`: TOML data model (raw) and the validated [`ConfigFile`].
//! - `loader.rs`: read a file from disk.
//! - `validate.rs`: `TryFrom<RawConfigFile> for ConfigFile`.
//! - `duration.rs`: `"500ms"` / `"5s"` style durations.

pub mod duration;
pub mod loader;
pub mod model;
pub mod validate;

pub use duration::parse_duration;
pub use loader::{load_and_validate, load_from_path, load_from_str};
pub use model::{
    ConfigFile, HealthCheck, HealthOverrides, NodeSettings, PhaseConfig, ProbeKind, ProvisionConfig,
    RawConfigFile, RawNodeSection, RawRetrySection, ServiceConfig, ServiceHealthConfig,
    ServiceSettings,
};
