use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::vm::DEFAULT_MAX_CALL_DEPTH;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("can't read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("can't parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(default)]
    pub consensus: ConsensusConfig,
    #[serde(default)]
    pub vm: VmConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConsensusConfig {
    /// Shares needed to finalize. Derived from the committee size when unset.
    #[serde(default)]
    pub quorum: Option<usize>,
    #[serde(default = "default_round_timeout_ms")]
    pub round_timeout_ms: u64,
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    #[serde(default = "default_early_message_limit")]
    pub early_message_limit: usize,
    #[serde(default = "default_early_message_max_ticks")]
    pub early_message_max_ticks: u32,
    #[serde(default = "default_determinism_warn_threshold")]
    pub determinism_warn_threshold: usize,
}

fn default_round_timeout_ms() -> u64 {
    5_000
}

fn default_tick_interval_ms() -> u64 {
    1_000
}

fn default_early_message_limit() -> usize {
    256
}

fn default_early_message_max_ticks() -> u32 {
    10
}

fn default_determinism_warn_threshold() -> usize {
    2
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            quorum: None,
            round_timeout_ms: default_round_timeout_ms(),
            tick_interval_ms: default_tick_interval_ms(),
            early_message_limit: default_early_message_limit(),
            early_message_max_ticks: default_early_message_max_ticks(),
            determinism_warn_threshold: default_determinism_warn_threshold(),
        }
    }
}

impl ConsensusConfig {
    pub fn round_timeout(&self) -> Duration {
        Duration::from_millis(self.round_timeout_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Configured quorum, or the largest-fault-tolerant one for `n` members.
    pub fn quorum_for(&self, n: usize) -> usize {
        self.quorum.unwrap_or_else(|| default_quorum(n))
    }
}

/// `n - f` where `f = floor((n - 1) / 3)`.
pub fn default_quorum(n: usize) -> usize {
    n - n.saturating_sub(1) / 3
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VmConfig {
    #[serde(default = "default_max_call_depth")]
    pub max_call_depth: usize,
}

fn default_max_call_depth() -> usize {
    DEFAULT_MAX_CALL_DEPTH
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            max_call_depth: default_max_call_depth(),
        }
    }
}

impl NodeConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn validate(&self, committee_size: usize) -> Result<(), ConfigError> {
        if committee_size == 0 {
            return Err(ConfigError::Invalid("empty committee".into()));
        }
        let quorum = self.consensus.quorum_for(committee_size);
        if quorum * 2 <= committee_size || quorum > committee_size {
            return Err(ConfigError::Invalid(format!(
                "quorum {} out of range for {} members",
                quorum, committee_size
            )));
        }
        if self.consensus.round_timeout_ms == 0 {
            return Err(ConfigError::Invalid("round timeout must be positive".into()));
        }
        if self.consensus.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid("tick interval must be positive".into()));
        }
        if self.vm.max_call_depth == 0 {
            return Err(ConfigError::Invalid("max call depth must be positive".into()));
        }
        Ok(())
    }
}
