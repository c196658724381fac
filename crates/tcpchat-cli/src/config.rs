//! Client configuration at `~/.tcpchat/client.toml`.
//!
//! CLI flags always override config file values.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub default: DefaultConfig,
}

/// Default connection settings.
#[derive(Debug, Clone, Deserialize)]
pub struct DefaultConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Username to register with when none is given on the command line.
    #[serde(default)]
    pub username: Option<String>,
}

impl Default for DefaultConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            username: None,
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5000
}

impl Config {
    /// Load configuration from a TOML file, returning defaults if the file
    /// does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config at {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("failed to parse config at {}", path.display()))?;

        debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    /// Default location: `~/.tcpchat/client.toml`.
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_default()
            .join(".tcpchat")
            .join("client.toml")
    }
}

/// Connection target after merging CLI flags over the config file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub addr: String,
    pub username: String,
}

/// Merge CLI values over `cfg`. A username must come from one or the other.
pub fn resolve(
    cfg: &Config,
    host: Option<&str>,
    port: Option<u16>,
    username: Option<&str>,
) -> Result<Target> {
    let host = host.unwrap_or(&cfg.default.host);
    let port = port.unwrap_or(cfg.default.port);
    let username = username
        .or(cfg.default.username.as_deref())
        .context("no username given and none set in the config file")?;
    Ok(Target {
        addr: format!("{host}:{port}"),
        username: username.to_string(),
    })
}
