//! CLI Configuration
//!
//! Manages the backend URL, an optional API token and relay settings stored
//! in ~/.zhonya/config.toml

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use zhonya_relay::config::API_URL_ENV;
use zhonya_relay::RelayConfig;

const DEFAULT_API_URL: &str = "http://localhost:5000";

#[derive(Debug, Serialize, Deserialize, Default)]
pub struct Config {
    pub api_url: Option<String>,
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relay: Option<RelayConfig>,
}

impl Config {
    /// Get the config file path (~/.zhonya/config.toml)
    pub fn path() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Could not determine home directory")?;
        Ok(home.join(".zhonya").join("config.toml"))
    }

    /// Load config from disk
    pub fn load() -> Result<Self> {
        let path = Self::path()?;
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config at {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Failed to parse config at {}", path.display()))
    }

    fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Save config to disk
    pub fn save(&self) -> Result<()> {
        let path = Self::path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Get API base URL, without a trailing slash
    pub fn api_url(&self) -> String {
        let url = std::env::var(API_URL_ENV)
            .ok()
            .filter(|url| !url.trim().is_empty())
            .or_else(|| self.api_url.clone())
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());
        url.trim_end_matches('/').to_string()
    }

    /// Relay settings for this run.
    ///
    /// A settings file given on the command line wins over the `[relay]`
    /// table. Without either, the relay shares the API's backend.
    pub fn relay_config(&self, file: Option<&Path>) -> Result<RelayConfig> {
        if let Some(path) = file {
            return RelayConfig::load(path);
        }

        let mut relay = match &self.relay {
            Some(relay) => relay.clone(),
            None => {
                let mut relay = RelayConfig::for_url(&self.api_url());
                // Keep the progress bar readable unless asked otherwise
                relay.logging.level = "warn".to_string();
                relay
            }
        };
        relay.apply_env();
        relay.validate()?;
        Ok(relay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zhonya_relay::TransportKind;

    #[test]
    fn test_parse_minimal() {
        let config = Config::parse(r#"api_url = "https://zhonya.example""#).unwrap();
        assert_eq!(config.api_url.as_deref(), Some("https://zhonya.example"));
        assert!(config.token.is_none());
        assert!(config.relay.is_none());
    }

    #[test]
    fn test_parse_relay_table() {
        let config = Config::parse(
            r#"
            token = "secret"

            [relay.endpoint]
            url = "http://relay.example:5000"
            transports = ["polling"]

            [relay.reconnect]
            max_attempts = 3
            "#,
        )
        .unwrap();

        let relay = config.relay.unwrap();
        assert_eq!(relay.endpoint.url, "http://relay.example:5000");
        assert_eq!(relay.endpoint.transports, vec![TransportKind::Polling]);
        assert_eq!(relay.reconnect.max_attempts, 3);
        // Unset fields keep their defaults
        assert_eq!(relay.endpoint.path, "/socket.io/");
    }

    #[test]
    fn test_relay_file_is_validated() {
        let dir = std::env::temp_dir().join(format!("zhonya-cli-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("relay.toml");
        std::fs::write(&path, "[endpoint]\ntransports = []\n").unwrap();

        let result = Config::default().relay_config(Some(&path));
        assert!(result.is_err());

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_round_trip_skips_missing_relay() {
        let config = Config {
            api_url: Some("http://localhost:5000".to_string()),
            token: None,
            relay: None,
        };
        let content = toml::to_string_pretty(&config).unwrap();
        assert!(!content.contains("relay"));
    }
}
