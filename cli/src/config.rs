// Configuration management for the vnetmesh CLI
//
// Cross-platform config stored in:
// - macOS: ~/.config/vnetmesh/config.json
// - Linux: ~/.config/vnetmesh/config.json
// - Windows: %APPDATA%\vnetmesh\config.json

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use vnetmesh_core::MeshSettings;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Reconciler settings: tag keys, naming contracts, loop timing
    pub mesh: MeshSettings,

    /// Mirror log file; relative paths resolve against the working directory
    pub log_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mesh: MeshSettings::default(),
            log_file: "vnetmesh.log".to_string(),
        }
    }
}

impl Config {
    /// Get the config directory path (cross-platform)
    pub fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to determine config directory")?
            .join("vnetmesh");

        std::fs::create_dir_all(&config_dir)
            .context("Failed to create config directory")?;

        Ok(config_dir)
    }

    /// Get the config file path
    pub fn config_file() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    /// Load config from file, or create default if not exists
    pub fn load() -> Result<Self> {
        let config_file = Self::config_file()?;

        if config_file.exists() {
            Self::load_from(&config_file)
        } else {
            let config = Config::default();
            config.save()?;
            Ok(config)
        }
    }

    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        let contents =
            std::fs::read_to_string(path).context("Failed to read config file")?;
        let config: Config =
            serde_json::from_str(&contents).context("Failed to parse config file")?;
        Ok(config)
    }

    /// Save config to file
    pub fn save(&self) -> Result<()> {
        let config_file = Self::config_file()?;
        let contents =
            serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(&config_file, contents).context("Failed to write config file")?;
        Ok(())
    }

    /// Set a config value by key
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "cluster_tag_key" => self.mesh.cluster_tag_key = value.to_string(),
            "gateway_marker_key" => self.mesh.gateway_marker_key = value.to_string(),
            "gateway_address_key" => self.mesh.gateway_address_key = value.to_string(),
            "route_table_name" => self.mesh.route_table_name = value.to_string(),
            "route_name" => self.mesh.route_name = value.to_string(),
            "route_prefix" => self.mesh.route_prefix = value.to_string(),
            "idle_interval_secs" => {
                self.mesh.idle_interval_secs =
                    value.parse().context("Invalid interval value")?;
            }
            "log_file" => self.log_file = value.to_string(),
            _ => anyhow::bail!("Unknown config key: {}", key),
        }
        self.mesh.validate().context("Rejected config value")?;
        self.save()?;
        Ok(())
    }
}
