//! Configuration discovery and loading
//!
//! This module handles the configuration discovery hierarchy:
//! 1. Current directory: ./edge-worker.toml
//! 2. User config: ~/.config/edge-worker/config.toml
//! 3. System config: /etc/edge-worker/config.toml
//! 4. Built-in defaults

use crate::engine::PodmanConfig;
use crate::env;
use crate::network::FirewallConfig;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::env as std_env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Everything the worker needs to know about its host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Root of manifests, exported volumes, mapping store and device config
    pub data_dir: PathBuf,
    pub firewall: FirewallConfig,
    pub engine: PodmanConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(env::DEFAULT_DATA_DIR),
            firewall: FirewallConfig::default(),
            engine: PodmanConfig::default(),
        }
    }
}

impl AgentConfig {
    /// Load from TOML file
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Save to TOML file
    pub fn to_toml_file<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to encode configuration")?;
        fs::write(path.as_ref(), content)
            .with_context(|| format!("Failed to write config file {}", path.as_ref().display()))
    }

    /// Replace the data directory when one is given
    pub fn with_data_dir(mut self, data_dir: Option<PathBuf>) -> Self {
        if let Some(data_dir) = data_dir {
            self.data_dir = data_dir;
        }
        self
    }
}

/// Configuration discovery system
pub struct ConfigDiscovery;

impl ConfigDiscovery {
    /// Load `config_override` if given, otherwise walk the discovery hierarchy
    pub fn load(config_override: Option<&Path>) -> anyhow::Result<AgentConfig> {
        match config_override {
            Some(path) => {
                info!("Loading configuration override from: {}", path.display());
                AgentConfig::from_toml_file(path)
            }
            None => Self::discover_config(),
        }
    }

    /// Discover and load configuration using the hierarchy
    pub fn discover_config() -> anyhow::Result<AgentConfig> {
        if let Some(config_path) = Self::find_config_file() {
            info!("Loading configuration from: {}", config_path.display());
            return AgentConfig::from_toml_file(config_path);
        }

        info!("No configuration file found, using defaults");
        Ok(AgentConfig::default())
    }

    /// Find configuration file using discovery hierarchy
    pub fn find_config_file() -> Option<PathBuf> {
        Self::get_config_candidates()
            .into_iter()
            .inspect(|candidate| debug!("Checking for config file: {}", candidate.display()))
            .find(|candidate| candidate.is_file())
    }

    /// Get list of configuration file candidates in priority order
    fn get_config_candidates() -> Vec<PathBuf> {
        let mut candidates = Vec::new();

        if let Ok(current_dir) = std_env::current_dir() {
            candidates.push(env::local_config_file_path(&current_dir));
        }

        if let Some(home_dir) = Self::get_home_dir() {
            candidates.push(env::user_config_file_path(&home_dir));
        }

        candidates.push(env::system_config_file_path());
        candidates
    }

    fn get_home_dir() -> Option<PathBuf> {
        std_env::var("HOME").ok().map(PathBuf::from)
    }

    /// Show configuration discovery information for debugging
    pub fn show_discovery_info(effective: &AgentConfig) {
        println!("Configuration Discovery Hierarchy:");
        println!();

        for (i, candidate) in Self::get_config_candidates().iter().enumerate() {
            let status = if candidate.exists() {
                if candidate.is_file() {
                    "EXISTS"
                } else {
                    "NOT A FILE"
                }
            } else {
                "NOT FOUND"
            };
            println!("  {}. {} - {}", i + 1, candidate.display(), status);
        }

        println!();
        match Self::find_config_file() {
            Some(found) => println!("Active configuration: {}", found.display()),
            None => println!("Active configuration: Built-in defaults"),
        }

        println!();
        match toml::to_string_pretty(effective) {
            Ok(rendered) => println!("Effective configuration:\n\n{}", rendered),
            Err(e) => println!("Effective configuration could not be rendered: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = AgentConfig::default();
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/edge-worker"));
        assert_eq!(config.firewall.table, "edge");
        assert_eq!(config.engine.command_timeout_secs, 120);
    }

    #[test]
    fn test_config_file_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");

        let mut original = AgentConfig::default().with_data_dir(Some(temp_dir.path().to_path_buf()));
        original.firewall.nft_binary = Some(PathBuf::from("/usr/sbin/nft"));
        original.to_toml_file(&config_path).unwrap();

        let loaded = AgentConfig::from_toml_file(&config_path).unwrap();
        assert_eq!(loaded, original);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: AgentConfig = toml::from_str(
            r#"
data_dir = "/srv/edge"

[firewall]
table = "workloads"
"#,
        )
        .unwrap();

        assert_eq!(config.data_dir, PathBuf::from("/srv/edge"));
        assert_eq!(config.firewall.table, "workloads");
        assert_eq!(config.firewall.family, "inet");
        assert_eq!(config.engine, PodmanConfig::default());
    }

    #[test]
    fn test_invalid_config_reports_path() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("broken.toml");
        fs::write(&config_path, "data_dir = [").unwrap();

        let error = AgentConfig::from_toml_file(&config_path).unwrap_err();
        assert!(format!("{:#}", error).contains("broken.toml"));
    }

    #[test]
    fn test_override_takes_precedence() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("override.toml");
        fs::write(&config_path, "data_dir = \"/opt/edge\"\n").unwrap();

        let config = ConfigDiscovery::load(Some(&config_path)).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/opt/edge"));
    }

    #[test]
    fn test_config_candidates() {
        let candidates = ConfigDiscovery::get_config_candidates();

        assert!(!candidates.is_empty());
        assert_eq!(candidates[0].file_name().unwrap(), "edge-worker.toml");
        assert_eq!(
            candidates.last().unwrap(),
            &PathBuf::from("/etc/edge-worker/config.toml")
        );
    }
}
