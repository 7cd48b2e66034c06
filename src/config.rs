use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

fn default_server_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_redaction() -> bool {
    true
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    /// Base URL of the chat/redaction backend.
    #[serde(default = "default_server_url")]
    pub server_url: String,
    /// When false the detect/review step is skipped and sends go direct.
    #[serde(default = "default_redaction")]
    pub redaction: bool,
    /// tracing env-filter directive, e.g. "piichat=debug".
    pub log_filter: Option<String>,
}

impl Config {
    pub fn new() -> Self {
        Self {
            server_url: default_server_url(),
            redaction: default_redaction(),
            log_filter: None,
        }
    }

    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            return Ok(Self::new());
        }

        let config_content = fs::read_to_string(&config_path)?;
        let config: Config = serde_json::from_str(&config_content)?;
        Ok(config)
    }

    /// Load the config, writing the defaults to disk on first run so there
    /// is a file to edit.
    pub fn load_or_init() -> Self {
        match Self::config_path() {
            Ok(path) if !path.exists() => {
                let config = Self::new();
                let _ = config.save();
                config
            }
            _ => Self::load().unwrap_or_else(|_| Self::new()),
        }
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;

        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let config_content = serde_json::to_string_pretty(self)?;
        fs::write(&config_path, config_content)?;
        Ok(())
    }

    pub fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow!("Could not determine config directory"))?;
        Ok(config_dir.join("piichat"))
    }

    fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.server_url, "http://localhost:3000");
        assert!(config.redaction);
        assert!(config.log_filter.is_none());
    }

    #[test]
    fn round_trips_through_json() {
        let mut config = Config::new();
        config.server_url = "http://10.0.0.2:8080".into();
        config.redaction = false;

        let json = serde_json::to_string(&config).unwrap();
        let back: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(back.server_url, config.server_url);
        assert!(!back.redaction);
    }
}
