//! Configuration management for wsproxy.
//!
//! Handles loading and saving configuration from the platform config
//! directory (`wsproxy/config.toml`).

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub proxy: ProxyConfig,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Bearer token attached to each WebSocket handshake.
    pub token: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Default remote WebSocket gateway URL (`ws://` or `wss://`).
    pub remote: Option<String>,
    /// Default destination address forwarded to the gateway (`host:port`).
    pub dest: Option<String>,
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))
    }

    pub fn config_path() -> Result<PathBuf> {
        let proj_dirs =
            ProjectDirs::from("", "", "wsproxy").context("Could not determine config directory")?;

        Ok(proj_dirs.config_dir().join("config.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_loads_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("config.toml")).unwrap();
        assert!(config.auth.token.is_none());
        assert!(config.proxy.remote.is_none());
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = Config {
            auth: AuthConfig {
                token: Some("tok_abc123".into()),
            },
            proxy: ProxyConfig {
                remote: Some("wss://gateway.example:4545".into()),
                dest: Some("10.0.0.5:22".into()),
            },
        };
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.auth.token.as_deref(), Some("tok_abc123"));
        assert_eq!(
            loaded.proxy.remote.as_deref(),
            Some("wss://gateway.example:4545")
        );
        assert_eq!(loaded.proxy.dest.as_deref(), Some("10.0.0.5:22"));
    }

    #[test]
    fn partial_config_parses() {
        let config: Config = toml::from_str("[auth]\ntoken = \"t\"\n").unwrap();
        assert_eq!(config.auth.token.as_deref(), Some("t"));
        assert!(config.proxy.dest.is_none());
    }
}
