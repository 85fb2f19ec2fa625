use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

/// How the node is being executed.
///
/// Phase tasks use this to decide whether they apply: most hardware-facing
/// work (network reset, disk setup) is skipped inside a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Bare metal or a full VM with direct hardware access.
    Bare,
    /// Cloud instance; hardware is virtual but the node owns the kernel.
    Cloud,
    /// Running inside a container; the host owns networking and devices.
    Container,
}

impl Default for ExecutionMode {
    fn default() -> Self {
        ExecutionMode::Bare
    }
}

impl FromStr for ExecutionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "bare" | "metal" => Ok(ExecutionMode::Bare),
            "cloud" => Ok(ExecutionMode::Cloud),
            "container" => Ok(ExecutionMode::Container),
            other => Err(format!(
                "invalid execution mode: {other} (expected \"bare\", \"cloud\" or \"container\")"
            )),
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecutionMode::Bare => "bare",
            ExecutionMode::Cloud => "cloud",
            ExecutionMode::Container => "container",
        };
        f.write_str(s)
    }
}
