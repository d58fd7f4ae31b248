//! Simulator configuration.
//!
//! Loaded from an optional JSON file; CLI flags override individual fields.
//!
//! ```json
//! {
//!   "membership": { "activationDelayMs": 30000, "graceWindowMs": 60000 },
//!   "sim": { "bandwidthBytesPerSec": 1000000, "maxInFlight": 5 }
//! }
//! ```

use membership_core::MembershipConfig;
use membership_core::config::duration_ms;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Simulated network settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimConfig {
    /// Response delivery rate; 0 disables throttling (default: 1MB/s)
    #[serde(default = "default_bandwidth")]
    pub bandwidth_bytes_per_sec: u64,
    /// Concurrent requests an endpoint serves before rejecting (default: 5)
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
    /// How often dispatchers run due tasks (default: 100ms)
    #[serde(
        rename = "tickIntervalMs",
        with = "duration_ms",
        default = "default_tick_interval"
    )]
    pub tick_interval: Duration,
}

fn default_bandwidth() -> u64 {
    1_000_000
}

fn default_max_in_flight() -> usize {
    5
}

fn default_tick_interval() -> Duration {
    Duration::from_millis(100)
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            bandwidth_bytes_per_sec: default_bandwidth(),
            max_in_flight: default_max_in_flight(),
            tick_interval: default_tick_interval(),
        }
    }
}

/// Everything the simulator reads from a config file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub membership: MembershipConfig,
    #[serde(default)]
    pub sim: SimConfig,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sim.max_in_flight == 0 {
            return Err(ConfigError::Invalid("maxInFlight must be at least 1".into()));
        }
        if self.sim.tick_interval.is_zero() {
            return Err(ConfigError::Invalid("tickIntervalMs must be positive".into()));
        }
        Ok(())
    }
}
