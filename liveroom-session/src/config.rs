//! Session manager configuration

use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Session manager configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Number of concurrent publishers the registry reports capacity for
    pub publisher_capacity: usize,
    /// Settle delay between a confirmed unpublish and the republish (ms)
    pub republish_delay_ms: u64,
    /// Refuse `publish` when the registry is at capacity
    pub enforce_publisher_capacity: bool,
    pub logging: LoggingConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            publisher_capacity: 12,
            republish_delay_ms: 400,
            enforce_publisher_capacity: false,
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

impl SessionConfig {
    /// Load configuration from, in increasing priority:
    /// defaults, the config file (if given and present), `LIVEROOM_*` variables.
    ///
    /// Nested keys use a double underscore, e.g. `LIVEROOM_LOGGING__LEVEL`.
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("LIVEROOM")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    #[must_use]
    pub const fn republish_delay(&self) -> Duration {
        Duration::from_millis(self.republish_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.publisher_capacity, 12);
        assert_eq!(config.republish_delay(), Duration::from_millis(400));
        assert!(!config.enforce_publisher_capacity);
        assert_eq!(config.logging.format, "pretty");
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "publisher_capacity = 4\nrepublish_delay_ms = 250\n\n[logging]\nformat = \"json\""
        )
        .unwrap();

        let config = SessionConfig::load(file.path().to_str()).unwrap();
        assert_eq!(config.publisher_capacity, 4);
        assert_eq!(config.republish_delay_ms, 250);
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.logging.level, "info");
        assert!(!config.enforce_publisher_capacity);
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = SessionConfig::load(Some("/nonexistent/liveroom.toml")).unwrap();
        assert_eq!(config.publisher_capacity, 12);
    }
}
