use anyhow::{anyhow, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::convo::DEFAULT_LIMIT;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChikaConfig {
    /// Id of the signed-in person
    #[serde(default)]
    pub me_id: String,
    #[serde(default = "default_page_limit")]
    pub page_limit: usize,
    #[serde(default = "default_lookup_timeout_ms")]
    pub lookup_timeout_ms: u64,
}

fn default_page_limit() -> usize {
    DEFAULT_LIMIT
}

fn default_lookup_timeout_ms() -> u64 {
    10_000
}

impl Default for ChikaConfig {
    fn default() -> Self {
        ChikaConfig {
            me_id: String::new(),
            page_limit: default_page_limit(),
            lookup_timeout_ms: default_lookup_timeout_ms(),
        }
    }
}

impl ChikaConfig {
    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_millis(self.lookup_timeout_ms)
    }
}

pub fn default_config_path() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or_else(|| anyhow!("Could not determine config directory"))?
        .join("chika");
    Ok(config_dir.join("config.json"))
}

/// Read the config at `path`, falling back to defaults when it is missing or invalid
pub fn load_config(path: &Path) -> ChikaConfig {
    match fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str::<ChikaConfig>(&contents) {
            Ok(config) => {
                info!("Loaded config from {}", path.display());
                config
            }
            Err(e) => {
                warn!("Failed to parse config file {}: {}", path.display(), e);
                ChikaConfig::default()
            }
        },
        Err(e) => {
            info!("Config file {} not found ({}); using defaults", path.display(), e);
            ChikaConfig::default()
        }
    }
}

pub fn save_config(path: &Path, config: &ChikaConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let file = fs::File::create(path)?;
    serde_json::to_writer_pretty(file, config)?;
    info!("Config saved to {}", path.display());
    Ok(())
}
