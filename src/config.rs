//! WolfElect Configuration
//!
//! TOML configuration for an election participant.

use serde::{Deserialize, Serialize};

use crate::coord::path;

/// Main WolfElect configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WolfElectConfig {
    /// Election group configuration
    #[serde(default)]
    pub election: ElectionConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Election group configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElectionConfig {
    /// Path of the election group node
    #[serde(default = "default_path")]
    pub path: String,

    /// Label placed before the sequence number of our candidate node
    #[serde(default)]
    pub prefix: Option<String>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (pretty, json)
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_path() -> String {
    "/wolfelect".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            path: default_path(),
            prefix: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl WolfElectConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a TOML string
    pub fn from_str(content: &str) -> crate::Result<Self> {
        let config: WolfElectConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        path::normalize(&self.election.path)
            .map_err(|_| crate::Error::Config(format!("election.path {:?} is not a valid node path", self.election.path)))?;

        if let Some(prefix) = &self.election.prefix {
            if prefix.contains('/') {
                return Err(crate::Error::Config("election.prefix cannot contain '/'".into()));
            }
        }

        if !matches!(self.logging.format.as_str(), "pretty" | "json") {
            return Err(crate::Error::Config(format!(
                "logging.format must be pretty or json, got {:?}",
                self.logging.format
            )));
        }

        Ok(())
    }

    /// Normalized election group path
    pub fn group_path(&self) -> crate::Result<String> {
        Ok(path::normalize(&self.election.path)?)
    }
}
