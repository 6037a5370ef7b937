pub mod channel_names;
pub mod link_config;

use std::path::Path;

use anyhow::Result;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::fs;

pub use channel_names::{ChannelNames, JsonNameStore, MemoryNameStore, NameStore};
pub use link_config::LinkConfig;

use crate::core::protocol::CutoffConfig;
use crate::utils::ensure_directory_exists;

const CONFIG_FILE_NAME: &str = "acm_config.json";
pub const CHANNEL_NAMES_FILE_NAME: &str = "channel_names.json";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub link: LinkConfig,
    /// Last cutoff settings sent to the controller
    pub cutoff: CutoffConfig,
}

impl AppConfig {
    /// Loads the config from `config_dir`, using defaults when no file is there yet.
    pub async fn load_config(config_dir: &Path) -> Result<Self> {
        let file_path = config_dir.join(CONFIG_FILE_NAME);

        if !file_path.exists() {
            warn!("Config file not found at {:?}, using default.", file_path);
            return Ok(Self::default());
        }

        let config_json = fs::read_to_string(&file_path).await?;
        let config: Self = serde_json::from_str(&config_json)?;

        info!("Config loaded from {:?}", file_path);
        Ok(config)
    }

    pub async fn save_config(&self, config_dir: &Path) -> Result<()> {
        ensure_directory_exists(config_dir).await?;
        let file_path = config_dir.join(CONFIG_FILE_NAME);

        let config_json = match serde_json::to_string_pretty(self) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize config to JSON: {}", e);
                return Err(e.into());
            }
        };
        fs::write(&file_path, config_json).await?;

        info!("Config saved to {:?}.", file_path);
        Ok(())
    }
}
