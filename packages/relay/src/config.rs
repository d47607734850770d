//! Configuration module
//!
//! Handles loading and validating relay configuration from TOML files.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::connection::transport::TransportKind;

/// Environment variable that overrides the endpoint URL
pub const API_URL_ENV: &str = "ZHONYA_API_URL";

/// Main configuration structure for a relay connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Backend endpoint settings
    #[serde(default)]
    pub endpoint: EndpointConfig,

    /// Reconnection policy
    #[serde(default)]
    pub reconnect: ReconnectConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Backend endpoint configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Base URL of the backend (http/https)
    #[serde(default = "default_url")]
    pub url: String,

    /// Socket.IO mount path
    #[serde(default = "default_path")]
    pub path: String,

    /// Transport preference order
    #[serde(default = "default_transports")]
    pub transports: Vec<TransportKind>,

    /// Handshake timeout in milliseconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// Time given to a graceful close on teardown, in milliseconds
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_ms: u64,
}

/// Reconnection configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Reconnect after a lost connection
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Maximum reconnect attempts (0 = infinite)
    #[serde(default)]
    pub max_attempts: u32,

    /// Initial reconnect delay in milliseconds
    #[serde(default = "default_reconnect_delay")]
    pub delay_ms: u64,

    /// Upper bound for the reconnect delay in milliseconds
    #[serde(default = "default_max_reconnect_delay")]
    pub max_delay_ms: u64,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (pretty, json, compact)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_url() -> String {
    "http://localhost:5000".to_string()
}

fn default_path() -> String {
    "/socket.io/".to_string()
}

fn default_transports() -> Vec<TransportKind> {
    vec![TransportKind::WebSocket, TransportKind::Polling]
}

fn default_connect_timeout() -> u64 {
    20000
}

fn default_shutdown_timeout() -> u64 {
    1000
}

fn default_true() -> bool {
    true
}

fn default_reconnect_delay() -> u64 {
    1000
}

fn default_max_reconnect_delay() -> u64 {
    5000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            path: default_path(),
            transports: default_transports(),
            connect_timeout_ms: default_connect_timeout(),
            shutdown_timeout_ms: default_shutdown_timeout(),
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            max_attempts: 0,
            delay_ms: default_reconnect_delay(),
            max_delay_ms: default_max_reconnect_delay(),
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

impl Default for RelayConfig {
    fn default() -> Self {
        Self::default_config()
    }
}

impl EndpointConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

impl ReconnectConfig {
    /// Whether another attempt is allowed after `attempt` failed ones
    pub fn allows(&self, attempt: u32) -> bool {
        self.enabled && (self.max_attempts == 0 || attempt <= self.max_attempts)
    }

    /// Delay before reconnect attempt number `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let delay = self.delay_ms.saturating_mul(1u64 << exponent);
        Duration::from_millis(delay.min(self.max_delay_ms))
    }
}

impl RelayConfig {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let mut config: RelayConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Create a default configuration
    pub fn default_config() -> Self {
        Self {
            endpoint: EndpointConfig::default(),
            reconnect: ReconnectConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// Default configuration pointed at a specific backend
    pub fn for_url(url: &str) -> Self {
        let mut config = Self::default_config();
        config.endpoint.url = url.to_string();
        config
    }

    /// Apply environment overrides
    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var(API_URL_ENV) {
            if !url.trim().is_empty() {
                self.endpoint.url = url;
            }
        }
    }

    /// Check the settings that would otherwise fail later inside the driver
    pub fn validate(&self) -> Result<()> {
        if self.endpoint.transports.is_empty() {
            anyhow::bail!("endpoint.transports must list at least one transport");
        }
        reqwest::Url::parse(&self.endpoint.url)
            .with_context(|| format!("Invalid endpoint url: {}", self.endpoint.url))?;
        Ok(())
    }

    /// Save configuration to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .context("Failed to serialize configuration")?;

        std::fs::write(path.as_ref(), content)
            .with_context(|| format!("Failed to write config file: {}", path.as_ref().display()))?;

        Ok(())
    }
}
