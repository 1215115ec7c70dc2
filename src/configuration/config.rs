use super::types::*;
use crate::error_handling::types::ConfigError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Application configuration structure that defines all runtime parameters.
///
/// Loaded from a TOML file with `[server]`, `[storage]` and `[client]`
/// sections; every field has a default so an empty file is valid. Command
/// line flags parsed with `clap` are applied on top by `main`.
///
/// # Examples
///
/// ```
/// use radio_sync::configuration::config::Config;
///
/// let config = Config::from_toml_str("[server]\nport = 9000\n").unwrap();
/// assert_eq!(config.server.port, 9000);
/// assert_eq!(config.server.track_host, "soundcloud.com");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub client: ClientConfig,
}

impl Config {
    /// Reads and validates a TOML configuration file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(content).map_err(|e| ConfigError::TomlError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.bind_address.trim().is_empty() {
            return Err(ConfigError::InvalidValue("server.bind_address is empty".into()));
        }
        if self.server.track_host.trim().is_empty() {
            return Err(ConfigError::InvalidValue("server.track_host is empty".into()));
        }
        if let Some(url) = &self.server.public_url {
            if !is_http_url(url) {
                return Err(ConfigError::InvalidValue(format!(
                    "server.public_url must start with http:// or https://, got: {}",
                    url
                )));
            }
        }
        if !is_http_url(&self.client.server_url) {
            return Err(ConfigError::InvalidValue(format!(
                "client.server_url must start with http:// or https://, got: {}",
                self.client.server_url
            )));
        }
        Ok(())
    }
}

fn is_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}
