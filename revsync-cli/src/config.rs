use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use revsync_sync::DEFAULT_RETENTION_DAYS;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    pub device_name: String,
    pub device_id: String,
    pub storage_path: PathBuf,
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

fn default_retention_days() -> u32 {
    DEFAULT_RETENTION_DAYS
}

impl Config {
    /// Fresh configuration for a newly initialized device
    pub fn generate(device_name: &str, storage_path: PathBuf) -> Self {
        Self {
            device_name: device_name.to_string(),
            device_id: uuid::Uuid::new_v4().simple().to_string(),
            storage_path,
            retention_days: DEFAULT_RETENTION_DAYS,
        }
    }

    /// Save configuration to `path`, creating parent directories
    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        std::fs::write(config_path, content)
            .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;

        Ok(())
    }

    pub fn load_from(config_path: &Path) -> Result<Config> {
        let content = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        Ok(config)
    }
}

/// Get the path to the config file
pub fn get_config_path() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Home directory not found")?;
    Ok(home.join(".revsync").join("config.toml"))
}

/// Get the default storage path
pub fn default_storage_path() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Home directory not found")?;
    Ok(home.join(".revsync").join("store"))
}
