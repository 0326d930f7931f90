//! YAML application configuration.
//!
//! Covers the database file, the flush interval of the buffered
//! reporter, the console prefix, and the list of HTTP sources to
//! schedule. Loaded with [`AppConfig::load`], which validates after
//! parsing.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::source::http::HttpSourceConfig;

/// Default buffered-reporter flush interval (10 seconds).
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(10);

/// Smallest accepted flush interval.
pub const MIN_FLUSH_INTERVAL: Duration = Duration::from_millis(100);

/// Smallest accepted source pull interval.
pub const MIN_SOURCE_INTERVAL: Duration = Duration::from_secs(1);

fn default_flush_interval() -> Duration {
    DEFAULT_FLUSH_INTERVAL
}

fn default_console_prefix() -> String {
    "sample> ".to_string()
}

/// Configuration error types.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse the YAML configuration.
    #[error("failed to parse YAML config: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// A configuration value is invalid.
    #[error("config validation error: {0}")]
    Validation(String),
}

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Sample database file path.
    pub path: String,

    /// How often the buffered reporter flushes to disk (default: 10s).
    #[serde(default = "default_flush_interval", with = "humantime_serde")]
    pub flush_interval: Duration,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "tidemark.db".to_string(),
            flush_interval: DEFAULT_FLUSH_INTERVAL,
        }
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Prefix for the console reporter (default: `"sample> "`).
    #[serde(default = "default_console_prefix")]
    pub console_prefix: String,

    /// HTTP sources to schedule at startup.
    #[serde(default)]
    pub sources: Vec<HttpSourceConfig>,
}

impl AppConfig {
    /// Load configuration from a YAML file.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read, parsed, or
    /// validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.path.trim().is_empty() {
            return Err(ConfigError::Validation(
                "database path must not be empty".to_string(),
            ));
        }
        if self.database.flush_interval < MIN_FLUSH_INTERVAL {
            return Err(ConfigError::Validation(format!(
                "flush_interval must be at least {MIN_FLUSH_INTERVAL:?}"
            )));
        }

        for source in &self.sources {
            if source.name.trim().is_empty() {
                return Err(ConfigError::Validation(
                    "source name must not be empty".to_string(),
                ));
            }
            if source.url.trim().is_empty() {
                return Err(ConfigError::Validation(format!(
                    "source '{}' has an empty url",
                    source.name
                )));
            }
            if source.interval < MIN_SOURCE_INTERVAL {
                return Err(ConfigError::Validation(format!(
                    "source '{}' interval must be at least {MIN_SOURCE_INTERVAL:?}",
                    source.name
                )));
            }
            if source.timeout.is_zero() {
                return Err(ConfigError::Validation(format!(
                    "source '{}' timeout must be non-zero",
                    source.name
                )));
            }
        }

        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            console_prefix: default_console_prefix(),
            sources: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.database.path, "tidemark.db");
        assert_eq!(config.database.flush_interval, DEFAULT_FLUSH_INTERVAL);
        assert!(config.sources.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
database:
  path: /var/lib/tidemark/samples.db
  flush_interval: 5s
console_prefix: ">> "
sources:
  - name: example
    url: https://example.com/metric
    interval: 15s
    timeout: 3s
"#;
        let config: AppConfig = serde_yaml::from_str(yaml).unwrap();
        config.validate().unwrap();

        assert_eq!(config.database.path, "/var/lib/tidemark/samples.db");
        assert_eq!(config.database.flush_interval, Duration::from_secs(5));
        assert_eq!(config.console_prefix, ">> ");
        assert_eq!(config.sources.len(), 1);
        assert_eq!(config.sources[0].interval, Duration::from_secs(15));
        assert_eq!(config.sources[0].timeout, Duration::from_secs(3));
    }

    #[test]
    fn test_source_defaults_apply() {
        let yaml = r#"
database:
  path: tidemark.db
sources:
  - name: minimal
    url: https://example.com/
"#;
        let config: AppConfig = serde_yaml::from_str(yaml).unwrap();
        config.validate().unwrap();
        assert_eq!(config.sources[0].interval, Duration::from_secs(30));
        assert_eq!(config.sources[0].timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_validation_rejects_empty_url() {
        let yaml = r#"
database:
  path: tidemark.db
sources:
  - name: broken
    url: ""
"#;
        let config: AppConfig = serde_yaml::from_str(yaml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("empty url"));
    }

    #[test]
    fn test_validation_rejects_tiny_intervals() {
        let yaml = r#"
database:
  path: tidemark.db
  flush_interval: 10ms
"#;
        let config: AppConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_err());

        let yaml = r#"
database:
  path: tidemark.db
sources:
  - name: fast
    url: https://example.com/
    interval: 100ms
"#;
        let config: AppConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_err());
    }
}
