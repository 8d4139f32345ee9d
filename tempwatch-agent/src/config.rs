//! Configuration for the tempwatch agent.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tempwatch_common::config::LoggingConfig;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] json5::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Complete agent configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Sink connection settings.
    pub sink: SinkConfig,

    /// Agent identity and polling settings.
    #[serde(default)]
    pub agent: AgentSettings,

    /// Sensor source strategy.
    #[serde(default)]
    pub source: SourceConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Remote sink (REST database) settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    /// Base URL of the sink, e.g. "https://project.example.co".
    pub base_url: String,

    /// API key sent with every request.
    pub api_key: String,

    /// Request timeout in milliseconds (default: 10000).
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    10_000
}

impl SinkConfig {
    /// Base URL without a trailing slash.
    pub fn base_url(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }
}

/// Host identity and polling cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSettings {
    /// Hostname to register under.
    /// Use "auto" to detect automatically (default).
    #[serde(default = "default_auto")]
    pub hostname: String,

    /// IP address to register.
    /// Use "auto" to detect automatically (default).
    #[serde(default = "default_auto")]
    pub ip_address: String,

    /// Poll interval in seconds (default: 5).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

fn default_auto() -> String {
    "auto".to_string()
}

fn default_poll_interval() -> u64 {
    5
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            hostname: default_auto(),
            ip_address: default_auto(),
            poll_interval_secs: default_poll_interval(),
        }
    }
}

impl AgentSettings {
    /// Get the hostname to register, resolving "auto" if needed.
    pub fn get_hostname(&self) -> String {
        if self.hostname == "auto" {
            hostname::get()
                .ok()
                .and_then(|h| h.into_string().ok())
                .unwrap_or_else(|| "unknown".to_string())
        } else {
            self.hostname.clone()
        }
    }

    /// Get the IP address to register, resolving "auto" if needed.
    pub fn get_ip_address(&self) -> String {
        if self.ip_address == "auto" {
            local_ip_address::local_ip()
                .map(|ip| ip.to_string())
                .unwrap_or_else(|_| "127.0.0.1".to_string())
        } else {
            self.ip_address.clone()
        }
    }
}

/// Sensor source strategy selection.
///
/// The strategies are mutually exclusive; one is chosen per deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum SourceConfig {
    /// Read temperatures from the local hardware-monitoring interface.
    Live,
    /// Parse the latest row of a periodically refreshed CSV export.
    FileExport { path: PathBuf },
}

impl Default for SourceConfig {
    fn default() -> Self {
        SourceConfig::Live
    }
}

impl AgentConfig {
    /// Load configuration from a JSON5 file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: AgentConfig = json5::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sink.base_url.trim().is_empty() {
            return Err(ConfigError::Validation(
                "sink.base_url must not be empty".to_string(),
            ));
        }

        if self.sink.api_key.trim().is_empty() {
            return Err(ConfigError::Validation(
                "sink.api_key must not be empty".to_string(),
            ));
        }

        if self.agent.poll_interval_secs == 0 {
            return Err(ConfigError::Validation(
                "poll_interval_secs must be > 0".to_string(),
            ));
        }

        if let SourceConfig::FileExport { path } = &self.source {
            if path.as_os_str().is_empty() {
                return Err(ConfigError::Validation(
                    "source.path must not be empty for the file_export strategy".to_string(),
                ));
            }
        }

        Ok(())
    }
}
