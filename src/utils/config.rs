// src/utils/config.rs
//! Engine configuration
//!
//! Host-level settings for the process orchestration layer: port lease
//! ranges, lock-file location, artifact poll window, kill grace period.
//! These are properties of the machine the engine runs on, not of one
//! optimization session, so they load separately from the optimization
//! config: built-in defaults, overridden by an optional `engine.yaml`
//! next to the working directory, overridden by `SIMOPT_*` environment
//! variables (e.g. `SIMOPT_MASTER_PORT_RANGE__START=18000`).

use crate::utils::errors::{EngineError, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::path::PathBuf;
use std::time::Duration;

/// Inclusive-start, exclusive-end port range for lease sampling
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

impl PortRange {
    pub fn as_range(&self) -> Range<u16> {
        self.start..self.end
    }
}

/// Host-level engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Port range for the master middleware endpoint
    pub master_port_range: PortRange,

    /// Port range for the world/simulation middleware endpoint
    pub world_port_range: PortRange,

    /// How long a single lease acquisition may keep sampling ports
    pub port_lease_timeout_secs: u64,

    /// Directory holding the advisory port lock files
    pub lock_dir: PathBuf,

    /// Filename prefix for port lock files
    pub lock_prefix: String,

    /// Number of polls for the recording artifact after process exit
    pub artifact_poll_attempts: u32,

    /// Delay between artifact polls in milliseconds
    pub artifact_poll_interval_ms: u64,

    /// Grace period between SIGTERM and SIGKILL when killing a process tree
    pub kill_grace_secs: u64,

    /// Settle delay after spawn before the process tree is snapshotted,
    /// giving the simulation launcher time to fork its children
    pub spawn_settle_ms: u64,

    /// Directory for per-task process logs
    pub log_dir: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            master_port_range: PortRange {
                start: 15000,
                end: 20000,
            },
            world_port_range: PortRange {
                start: 25000,
                end: 30000,
            },
            port_lease_timeout_secs: 10,
            lock_dir: PathBuf::from("/tmp"),
            lock_prefix: "simopt-port-lock".to_string(),
            artifact_poll_attempts: 30,
            artifact_poll_interval_ms: 100,
            kill_grace_secs: 5,
            spawn_settle_ms: 1000,
            log_dir: PathBuf::from("logs"),
        }
    }
}

impl EngineConfig {
    /// Load the engine configuration: defaults, then `engine.yaml` if
    /// present, then `SIMOPT_*` environment overrides.
    pub fn load() -> Result<Self> {
        let defaults = Config::try_from(&EngineConfig::default())
            .map_err(|e| EngineError::Configuration(format!("invalid defaults: {e}")))?;

        let cfg = Config::builder()
            .add_source(defaults)
            .add_source(File::with_name("engine").required(false))
            .add_source(Environment::with_prefix("SIMOPT").separator("__"))
            .build()
            .map_err(|e| EngineError::Configuration(format!("failed to load engine config: {e}")))?;

        let loaded: EngineConfig = cfg
            .try_deserialize()
            .map_err(|e| EngineError::Configuration(format!("invalid engine config: {e}")))?;

        loaded.validate()?;
        Ok(loaded)
    }

    /// Validate range and timing settings
    pub fn validate(&self) -> Result<()> {
        for (label, range) in [
            ("master_port_range", &self.master_port_range),
            ("world_port_range", &self.world_port_range),
        ] {
            if range.start >= range.end {
                return Err(EngineError::Configuration(format!(
                    "{label} is empty: {}..{}",
                    range.start, range.end
                )));
            }
        }

        let master = self.master_port_range.as_range();
        let world = self.world_port_range.as_range();
        if master.start < world.end && world.start < master.end {
            return Err(EngineError::Configuration(format!(
                "port ranges overlap: {}..{} and {}..{}",
                master.start, master.end, world.start, world.end
            )));
        }

        if self.port_lease_timeout_secs == 0 {
            return Err(EngineError::Configuration(
                "port_lease_timeout_secs must be greater than zero".into(),
            ));
        }

        Ok(())
    }

    pub fn port_lease_timeout(&self) -> Duration {
        Duration::from_secs(self.port_lease_timeout_secs)
    }

    pub fn artifact_poll_interval(&self) -> Duration {
        Duration::from_millis(self.artifact_poll_interval_ms)
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_secs(self.kill_grace_secs)
    }

    pub fn spawn_settle(&self) -> Duration {
        Duration::from_millis(self.spawn_settle_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.master_port_range.start, 15000);
        assert_eq!(config.master_port_range.end, 20000);
        assert_eq!(config.world_port_range.start, 25000);
        assert_eq!(config.artifact_poll_attempts, 30);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_overlapping_ranges_rejected() {
        let config = EngineConfig {
            world_port_range: PortRange {
                start: 18000,
                end: 22000,
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_range_rejected() {
        let config = EngineConfig {
            master_port_range: PortRange {
                start: 16000,
                end: 16000,
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
