//! Configuration types for the cross-shard engine

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{XShardError, XShardResult};

/// Protocol thresholds shared by the coordinator components
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Distinct validator signatures needed to advance a phase
    pub required_validations: usize,

    /// Distinct validator signatures needed to verify a checkpoint transition
    pub required_verifications: usize,

    /// Largest balance change allowed per account, as a percentage of the
    /// previous balance
    pub max_delta_percent: u64,

    /// Seconds a prepared phase may sit idle before commit is refused (0 disables)
    pub phase_timeout_secs: u64,

    /// Seconds a checkpoint is retained before cleanup evicts its transaction
    pub checkpoint_max_age_secs: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            required_validations: 3,
            required_verifications: 3,
            max_delta_percent: 50,
            phase_timeout_secs: 3600,
            checkpoint_max_age_secs: 24 * 3600,
        }
    }
}

/// Longest timeout or retention window accepted, in seconds (100 years)
pub const MAX_WINDOW_SECS: u64 = 100 * 365 * 24 * 3600;

impl CoordinatorConfig {
    pub fn phase_timeout(&self) -> XShardResult<Option<Duration>> {
        if self.phase_timeout_secs == 0 {
            Ok(None)
        } else {
            window("phase_timeout_secs", self.phase_timeout_secs).map(Some)
        }
    }

    pub fn checkpoint_max_age(&self) -> XShardResult<Duration> {
        window("checkpoint_max_age_secs", self.checkpoint_max_age_secs)
    }

    /// Reject thresholds that would make quorum trivially reachable
    pub fn validate(&self) -> XShardResult<()> {
        if self.required_validations == 0 {
            return Err(XShardError::ConfigError(
                "required_validations must be at least 1".into(),
            ));
        }
        if self.required_verifications == 0 {
            return Err(XShardError::ConfigError(
                "required_verifications must be at least 1".into(),
            ));
        }
        if self.max_delta_percent > 100 {
            return Err(XShardError::ConfigError(
                "max_delta_percent cannot exceed 100".into(),
            ));
        }
        self.phase_timeout()?;
        self.checkpoint_max_age()?;
        Ok(())
    }
}

fn window(field: &str, secs: u64) -> XShardResult<Duration> {
    if secs > MAX_WINDOW_SECS {
        return Err(XShardError::ConfigError(format!(
            "{} cannot exceed {} seconds",
            field, MAX_WINDOW_SECS
        )));
    }
    Duration::try_seconds(secs as i64)
        .ok_or_else(|| XShardError::ConfigError(format!("{} is out of range", field)))
}

/// Shape of the simulated network the node binary drives
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Number of shards; shard 0 is the source, the rest are targets
    pub shards: u32,

    /// Number of validators voting on every phase
    pub validators: usize,

    /// Accounts created per shard
    pub accounts_per_shard: usize,

    /// Opening balance of every account
    pub initial_balance: u64,

    /// Amount moved between accounts inside each shard
    pub transfer_amount: u64,

    /// Hex seed for deterministic validator keys (random if empty)
    pub validator_seed: String,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            shards: 3,
            validators: 4,
            accounts_per_shard: 2,
            initial_balance: 1_000,
            transfer_amount: 100,
            validator_seed: String::new(),
        }
    }
}

/// Main node configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Node name for logging
    pub name: String,

    /// Logging filter, e.g. `info` or `xshard_coordinator=debug`
    pub log_level: String,

    /// Directory of the recovery store
    pub data_dir: PathBuf,

    /// Protocol thresholds
    pub coordinator: CoordinatorConfig,

    /// Simulated network
    pub simulation: SimulationConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: "xshard-node".to_string(),
            log_level: "info".to_string(),
            data_dir: PathBuf::from("./data"),
            coordinator: CoordinatorConfig::default(),
            simulation: SimulationConfig::default(),
        }
    }
}

impl NodeConfig {
    pub fn from_json(json: &str) -> XShardResult<Self> {
        let config: NodeConfig = serde_json::from_str(json)?;
        config.coordinator.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> XShardResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CoordinatorConfig::default();
        assert_eq!(config.required_validations, 3);
        assert_eq!(config.required_verifications, 3);
        assert_eq!(config.max_delta_percent, 50);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config =
            NodeConfig::from_json(r#"{"name":"n1","coordinator":{"required_validations":5}}"#)
                .unwrap();
        assert_eq!(config.name, "n1");
        assert_eq!(config.coordinator.required_validations, 5);
        assert_eq!(config.coordinator.required_verifications, 3);
        assert_eq!(config.simulation, SimulationConfig::default());
    }

    #[test]
    fn test_invalid_thresholds_rejected() {
        assert!(NodeConfig::from_json(r#"{"coordinator":{"required_validations":0}}"#).is_err());
        assert!(NodeConfig::from_json(r#"{"coordinator":{"max_delta_percent":150}}"#).is_err());
    }

    #[test]
    fn test_phase_timeout_disabled_by_zero() {
        let config = CoordinatorConfig {
            phase_timeout_secs: 0,
            ..Default::default()
        };
        assert!(config.phase_timeout().unwrap().is_none());
    }

    #[test]
    fn test_oversized_windows_rejected() {
        let config = CoordinatorConfig {
            phase_timeout_secs: 100_000_000_000_000_000,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(XShardError::ConfigError(_))));
        assert!(config.phase_timeout().is_err());
        assert!(
            NodeConfig::from_json(r#"{"coordinator":{"checkpoint_max_age_secs":18446744073709551615}}"#)
                .is_err()
        );

        let at_limit = CoordinatorConfig {
            checkpoint_max_age_secs: MAX_WINDOW_SECS,
            ..Default::default()
        };
        assert!(at_limit.validate().is_ok());
    }
}
