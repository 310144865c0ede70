//! Consensus configuration: plain serde structs with `Default` impls
//! and TOML/JSON load & save, trimmed down to the six pacemaker knobs
//! the core actually consumes. Network, storage-engine and keystore
//! configuration are not the core's concern — they live behind the
//! external-collaborator traits in [`crate::external`].

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::HotStuffError;

/// The pacemaker's tunable timeout/backoff knobs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConsensusConfig {
    /// Starting `T` for the replica-timeout schedule.
    pub initial_timeout_ms: u64,
    /// Lower clamp for `T`.
    pub min_timeout_ms: u64,
    /// Leader-side additional wait as a fraction of `T` while collecting votes.
    pub vote_aggregation_timeout_fraction: f64,
    /// Multiplicative increase applied to `T` on non-progress.
    pub timeout_increase_factor: f64,
    /// Multiplicative decrease applied to `T` on progress.
    pub timeout_decrease_factor: f64,
    /// Mandatory delay a leader inserts before broadcasting a proposal.
    pub block_rate_delay_ms: u64,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            initial_timeout_ms: 1_000,
            min_timeout_ms: 250,
            vote_aggregation_timeout_fraction: 0.5,
            timeout_increase_factor: 1.5,
            timeout_decrease_factor: 0.8,
            block_rate_delay_ms: 0,
        }
    }
}

impl ConsensusConfig {
    pub fn initial_timeout(&self) -> Duration {
        Duration::from_millis(self.initial_timeout_ms)
    }

    pub fn min_timeout(&self) -> Duration {
        Duration::from_millis(self.min_timeout_ms)
    }

    pub fn block_rate_delay(&self) -> Duration {
        Duration::from_millis(self.block_rate_delay_ms)
    }

    pub fn validate(&self) -> Result<(), HotStuffError> {
        if self.min_timeout_ms == 0 {
            return Err(HotStuffError::Configuration(
                "min_timeout_ms must be positive".to_string(),
            ));
        }
        if self.initial_timeout_ms < self.min_timeout_ms {
            return Err(HotStuffError::Configuration(
                "initial_timeout_ms must be >= min_timeout_ms".to_string(),
            ));
        }
        if self.timeout_increase_factor <= 1.0 {
            return Err(HotStuffError::Configuration(
                "timeout_increase_factor must be > 1.0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.timeout_decrease_factor)
            || self.timeout_decrease_factor <= 0.0
        {
            return Err(HotStuffError::Configuration(
                "timeout_decrease_factor must be in (0, 1]".to_string(),
            ));
        }
        if self.vote_aggregation_timeout_fraction <= 0.0
            || self.vote_aggregation_timeout_fraction > 1.0
        {
            return Err(HotStuffError::Configuration(
                "vote_aggregation_timeout_fraction must be in (0, 1]".to_string(),
            ));
        }
        Ok(())
    }

    /// Load configuration from a TOML or JSON file, selected by extension.
    pub fn load_from_file(path: &Path) -> Result<Self, HotStuffError> {
        let content = std::fs::read_to_string(path)?;
        let config = if path.extension().and_then(|e| e.to_str()) == Some("toml") {
            toml::from_str(&content)
                .map_err(|e| HotStuffError::Configuration(format!("invalid TOML config: {e}")))?
        } else {
            serde_json::from_str(&content)
                .map_err(|e| HotStuffError::Configuration(format!("invalid JSON config: {e}")))?
        };
        Ok(config)
    }

    pub fn save_to_file(&self, path: &Path) -> Result<(), HotStuffError> {
        let content = if path.extension().and_then(|e| e.to_str()) == Some("toml") {
            toml::to_string_pretty(self)
                .map_err(|e| HotStuffError::Configuration(format!("TOML serialize: {e}")))?
        } else {
            serde_json::to_string_pretty(self)
                .map_err(|e| HotStuffError::Configuration(format!("JSON serialize: {e}")))?
        };
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(ConsensusConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_non_increasing_backoff() {
        let mut cfg = ConsensusConfig::default();
        cfg.timeout_increase_factor = 1.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn round_trips_through_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("consensus.toml");
        let cfg = ConsensusConfig::default();
        cfg.save_to_file(&path).unwrap();
        let loaded = ConsensusConfig::load_from_file(&path).unwrap();
        assert_eq!(cfg, loaded);
    }
}
