// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::Result;

/// Read and deserialize a config file without validating it.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawConfigFile> {
    let contents = fs::read_to_string(path.as_ref())?;
    load_from_str(&contents)
}

pub fn load_from_str(contents: &str) -> Result<RawConfigFile> {
    let config: RawConfigFile = toml::from_str(contents)?;
    Ok(config)
}

/// Read, deserialize and validate. Durations are parsed and every default
/// is applied; the service graph itself is checked later, when it is
/// finalized.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<ConfigFile> {
    let raw = load_from_path(&path)?;
    ConfigFile::try_from(raw)
}

pub fn default_config_path() -> PathBuf {
    PathBuf::from("/etc/nodevisor/nodevisor.toml")
}
