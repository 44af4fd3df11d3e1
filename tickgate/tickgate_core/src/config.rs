//! Configuration for the dispatcher and the resource pool.
//!
//! Every section has serde defaults, so an empty file (or no file at all)
//! yields the stock configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::utils::logging::LogLevel;

/// Settings for the time-gated execution context behind the dispatcher
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Soft ceiling on how long a single pump cycle may keep draining
    #[serde(default = "default_time_budget_ms")]
    pub time_budget_ms: f64,
}

fn default_time_budget_ms() -> f64 {
    10.0
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            time_budget_ms: default_time_budget_ms(),
        }
    }
}

impl DispatcherConfig {
    /// Create a config with the given budget in milliseconds
    pub fn with_budget_ms(time_budget_ms: f64) -> Self {
        Self { time_budget_ms }
    }

    /// The budget as a `Duration`
    pub fn time_budget(&self) -> Duration {
        Duration::from_nanos((self.time_budget_ms * 1_000_000.0).round() as u64)
    }

    /// Check that the budget is a positive, finite number of milliseconds
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.time_budget_ms.is_finite() || self.time_budget_ms <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "dispatcher.time_budget_ms must be a positive number, got {}",
                self.time_budget_ms
            )));
        }
        Ok(())
    }
}

/// Settings for the asynchronous resource pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Number of resources requested from the factory per refill
    #[serde(default = "default_refill_batch_size")]
    pub refill_batch_size: usize,
}

fn default_refill_batch_size() -> usize {
    2
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            refill_batch_size: default_refill_batch_size(),
        }
    }
}

impl PoolConfig {
    /// Check that a refill would request at least one resource
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.refill_batch_size == 0 {
            return Err(ConfigError::Invalid(
                "pool.refill_batch_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Minimum level that gets emitted
    #[serde(default = "default_log_level")]
    pub level: LogLevel,
}

fn default_log_level() -> LogLevel {
    LogLevel::Info
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TickgateConfig {
    /// Dispatcher settings
    #[serde(default)]
    pub dispatcher: DispatcherConfig,

    /// Resource pool settings
    #[serde(default)]
    pub pool: PoolConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl TickgateConfig {
    /// Parse and validate a configuration from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: TickgateConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file, or fall back to defaults when no path is given
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            log::debug!("No configuration file given, using defaults");
            return Ok(Self::default());
        };

        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;

        let config = Self::from_toml_str(&text)?;
        log::info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Validate every section
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.dispatcher.validate()?;
        self.pool.validate()
    }

    /// Render the configuration as TOML
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TickgateConfig::default();
        assert_eq!(config.dispatcher.time_budget_ms, 10.0);
        assert_eq!(config.dispatcher.time_budget(), Duration::from_millis(10));
        assert_eq!(config.pool.refill_batch_size, 2);
        assert_eq!(config.logging.level, LogLevel::Info);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = TickgateConfig::from_toml_str("").unwrap();
        assert_eq!(config, TickgateConfig::default());
    }

    #[test]
    fn test_partial_document() {
        let config = TickgateConfig::from_toml_str(
            r#"
            [dispatcher]
            time_budget_ms = 4.5

            [logging]
            level = "warn"
            "#,
        )
        .unwrap();

        assert_eq!(config.dispatcher.time_budget_ms, 4.5);
        assert_eq!(config.pool.refill_batch_size, 2);
        assert_eq!(config.logging.level, LogLevel::Warning);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = TickgateConfig::from_toml_str("[pool]\nrefill_batch_size = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err =
            TickgateConfig::from_toml_str("[dispatcher]\ntime_budget_ms = -1.0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_malformed_document() {
        let err = TickgateConfig::from_toml_str("[dispatcher\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_round_trip_through_toml() {
        let mut config = TickgateConfig::default();
        config.pool.refill_batch_size = 8;
        let text = config.to_toml_string().unwrap();
        assert!(text.contains("refill_batch_size = 8"));
        assert_eq!(TickgateConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn test_load_without_path() {
        assert_eq!(TickgateConfig::load(None).unwrap(), TickgateConfig::default());
    }
}
