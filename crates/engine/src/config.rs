//! Engine-level configuration: the connection tunables §4.5 requires
//! to be configurable (TCP_NODELAY, keepalive idle/probes/interval).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub tcp_nodelay: bool,
    pub keepalive: KeepaliveConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KeepaliveConfig {
    pub idle_secs: u64,
    pub probes: u32,
    pub interval_secs: u64,
}

impl KeepaliveConfig {
    pub fn idle(&self) -> Duration {
        Duration::from_secs(self.idle_secs)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            tcp_nodelay: true,
            keepalive: KeepaliveConfig {
                idle_secs: 30,
                probes: 9,
                interval_secs: 10,
            },
        }
    }
}

impl ConnectionConfig {
    /// Load from the specified path, falling back to the default
    /// location (next to a host application's binary) if none given.
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = path.unwrap_or_else(Self::default_path);
        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("failed to read config file: {}", config_path.display()))?;
        let config: ConnectionConfig = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", config_path.display()))?;
        tracing::info!(path = %config_path.display(), "loaded engine connection config");
        Ok(config)
    }

    pub fn load_or_default(path: Option<PathBuf>) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("failed to load connection config: {e:#}, using defaults");
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("failed to serialise connection config")?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("failed to create config directory: {}", parent.display()))?;
        }
        fs::write(path, content).with_context(|| format!("failed to write config file: {}", path.display()))?;
        Ok(())
    }

    pub fn default_path() -> PathBuf {
        if let Some(dir) = dirs::config_dir() {
            dir.join("usbip-win-rs").join("engine.toml")
        } else {
            PathBuf::from(".config/usbip-win-rs/engine.toml")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_spec_recommended_values() {
        let config = ConnectionConfig::default();
        assert!(config.tcp_nodelay);
        assert_eq!(config.keepalive.idle_secs, 30);
        assert_eq!(config.keepalive.probes, 9);
        assert_eq!(config.keepalive.interval_secs, 10);
    }

    #[test]
    fn roundtrips_through_toml() {
        let config = ConnectionConfig::default();
        let text = toml::to_string(&config).unwrap();
        let parsed: ConnectionConfig = toml::from_str(&text).unwrap();
        assert_eq!(config, parsed);
    }
}
