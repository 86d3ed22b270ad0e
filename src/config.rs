//! Configuration handling for fritz-vpn

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

use crate::fritz::session::Protocol;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub fritz: FritzConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FritzConfig {
    pub host: String,
    pub username: String,
    /// Leave empty to be prompted at startup.
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_protocol")]
    pub protocol: String,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

fn default_protocol() -> String {
    "https".to_string()
}

fn default_poll_interval() -> u64 {
    30
}

impl Default for Config {
    fn default() -> Self {
        Self {
            fritz: FritzConfig {
                host: "192.168.178.1".to_string(),
                username: String::new(),
                password: String::new(),
                protocol: default_protocol(),
                poll_interval_secs: default_poll_interval(),
            },
        }
    }
}

impl Config {
    pub fn load(path: &PathBuf) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self, path: &PathBuf) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).expect("Failed to serialize config");
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Preferred config location: `<config dir>/fritz-vpn/config.toml`,
    /// falling back to a file in the working directory.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .map(|dir| dir.join("fritz-vpn").join("config.toml"))
            .unwrap_or_else(|| PathBuf::from("fritz-vpn.toml"))
    }
}

impl FritzConfig {
    /// Parsed protocol; unknown values fall back to https with a warning.
    pub fn protocol(&self) -> Protocol {
        Protocol::from_name(&self.protocol).unwrap_or_else(|| {
            warn!("Unknown protocol '{}', using https", self.protocol);
            Protocol::Https
        })
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.fritz.host, "192.168.178.1");
        assert_eq!(config.fritz.protocol(), Protocol::Https);
        assert_eq!(config.fritz.poll_interval(), Duration::from_secs(30));
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.fritz.username = "admin".to_string();
        config.fritz.protocol = "http".to_string();
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.fritz.username, "admin");
        assert_eq!(loaded.fritz.protocol(), Protocol::Http);
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let toml = r#"
            [fritz]
            host = "fritz.box"
            username = "admin"
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert!(config.fritz.password.is_empty());
        assert_eq!(config.fritz.protocol(), Protocol::Https);
        assert_eq!(config.fritz.poll_interval_secs, 30);
    }

    #[test]
    fn test_unknown_protocol_falls_back_to_https() {
        let mut config = Config::default();
        config.fritz.protocol = "gopher".to_string();
        assert_eq!(config.fritz.protocol(), Protocol::Https);
    }
}
