//! Configuration management with validation and defaults.
//!
//! Layered configuration for the round engine, crash-point selector,
//! wager ledger, storage, and API surface. Loadable from a TOML file with
//! every section optional.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Top-level configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CrashpointConfig {
    #[serde(default)]
    pub round: RoundConfig,
    #[serde(default)]
    pub selector: SelectorConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

/// Round clock timing and multiplier growth.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RoundConfig {
    /// Waiting-phase countdown in whole seconds.
    pub countdown_secs: u32,
    /// Multiplier ticker period in milliseconds.
    pub tick_interval_ms: u64,
    /// Per-tick multiplier growth factor.
    pub growth_factor: f64,
    /// Pause between a crash and the next round, in milliseconds.
    pub restart_pause_ms: u64,
    /// Crash history entries kept in memory and replayed to new subscribers.
    pub history_limit: usize,
}

impl Default for RoundConfig {
    fn default() -> Self {
        Self {
            countdown_secs: 5,
            tick_interval_ms: 100,
            growth_factor: 1.009_93,
            restart_pause_ms: 3_000,
            history_limit: 10,
        }
    }
}

impl RoundConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn restart_pause(&self) -> Duration {
        Duration::from_millis(self.restart_pause_ms)
    }
}

/// Crash-point distribution parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SelectorConfig {
    /// Probability mass reserved for an instant crash at `min_crash`.
    pub house_edge: f64,
    /// Floor for every crash point, operator-set or random.
    pub min_crash: f64,
    /// Cap applied to the random distribution's unbounded tail.
    pub max_crash: f64,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            house_edge: 0.05,
            min_crash: 1.01,
            max_crash: 1_000.0,
        }
    }
}

/// Balance seeding and stake limits.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Balance credited to a player on first contact. Stand-in for the
    /// out-of-scope deposit flow; recorded as a balance-change row.
    pub starting_balance: f64,
    /// Largest accepted stake.
    pub max_stake: f64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            starting_balance: 1_000.0,
            max_stake: 10_000.0,
        }
    }
}

/// Durable storage location.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_directory: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_directory: "./DB/crashpoint".to_string(),
        }
    }
}

/// API server settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    pub request_timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            request_timeout_secs: 30,
        }
    }
}

impl ApiConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl CrashpointConfig {
    /// Load configuration from a TOML file. Missing sections fall back to
    /// defaults; the result is validated before use.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration for logical consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.round.countdown_secs == 0 {
            return Err(ConfigError::Invalid(
                "round.countdown_secs must be > 0".to_string(),
            ));
        }
        if self.round.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "round.tick_interval_ms must be > 0".to_string(),
            ));
        }
        if self.round.growth_factor <= 1.0 {
            return Err(ConfigError::Invalid(
                "round.growth_factor must be > 1.0".to_string(),
            ));
        }
        if self.round.history_limit == 0 {
            return Err(ConfigError::Invalid(
                "round.history_limit must be > 0".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.selector.house_edge) {
            return Err(ConfigError::Invalid(
                "selector.house_edge must be in [0, 1)".to_string(),
            ));
        }
        if self.selector.min_crash < 1.01 {
            return Err(ConfigError::Invalid(
                "selector.min_crash must be >= 1.01".to_string(),
            ));
        }
        if self.selector.max_crash <= self.selector.min_crash {
            return Err(ConfigError::Invalid(
                "selector.max_crash must exceed selector.min_crash".to_string(),
            ));
        }
        if self.ledger.starting_balance < 0.0 {
            return Err(ConfigError::Invalid(
                "ledger.starting_balance must be >= 0".to_string(),
            ));
        }
        if self.ledger.max_stake <= 0.0 {
            return Err(ConfigError::Invalid(
                "ledger.max_stake must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse configuration file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration value: {0}")]
    Invalid(String),
}
