//! User-assigned channel labels
//! Labels are display-only; nothing on the wire refers to them.

use std::path::PathBuf;

use anyhow::{Result, bail};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::Mutex;

use crate::core::telemetry::{LOW_CURRENT_CHANNELS, MEDIUM_CURRENT_CHANNELS, TOTAL_CHANNELS};
use crate::utils::ensure_directory_exists;

/// Labels for the eight low-current and two medium-current outputs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelNames {
    pub low_current: Vec<String>,
    pub medium_current: Vec<String>,
}

impl Default for ChannelNames {
    fn default() -> Self {
        ChannelNames {
            low_current: (1..=LOW_CURRENT_CHANNELS).map(|i| format!("LC{}", i)).collect(),
            medium_current: (1..=MEDIUM_CURRENT_CHANNELS).map(|i| format!("MC{}", i)).collect(),
        }
    }
}

impl ChannelNames {
    /// Replaces any bank whose length is wrong with its defaults.
    pub fn sanitized(mut self) -> Self {
        let defaults = Self::default();
        if self.low_current.len() != LOW_CURRENT_CHANNELS {
            warn!(
                "Ignoring {} stored low-current names, expected {}",
                self.low_current.len(),
                LOW_CURRENT_CHANNELS
            );
            self.low_current = defaults.low_current;
        }
        if self.medium_current.len() != MEDIUM_CURRENT_CHANNELS {
            warn!(
                "Ignoring {} stored medium-current names, expected {}",
                self.medium_current.len(),
                MEDIUM_CURRENT_CHANNELS
            );
            self.medium_current = defaults.medium_current;
        }
        self
    }

    /// All ten labels in mask order: LC1..LC8, then MC1, MC2.
    pub fn names(&self) -> Vec<String> {
        self.low_current
            .iter()
            .chain(self.medium_current.iter())
            .cloned()
            .collect()
    }

    pub fn name(&self, index: usize) -> Option<&str> {
        if index < LOW_CURRENT_CHANNELS {
            self.low_current.get(index).map(String::as_str)
        } else {
            self.medium_current
                .get(index - LOW_CURRENT_CHANNELS)
                .map(String::as_str)
        }
    }

    /// Renames the channel at `index` (mask order).
    pub fn set_name(&mut self, index: usize, name: impl Into<String>) -> Result<()> {
        if index >= TOTAL_CHANNELS {
            bail!("channel index {} out of range 0..{}", index, TOTAL_CHANNELS);
        }
        let slot = if index < LOW_CURRENT_CHANNELS {
            self.low_current.get_mut(index)
        } else {
            self.medium_current.get_mut(index - LOW_CURRENT_CHANNELS)
        };
        match slot {
            Some(slot) => {
                *slot = name.into();
                Ok(())
            }
            None => bail!("channel index {} has no stored name", index),
        }
    }
}

/// Where channel labels are kept between runs
#[async_trait::async_trait]
pub trait NameStore: Send + Sync {
    async fn load(&self) -> Result<ChannelNames>;
    async fn save(&self, names: &ChannelNames) -> Result<()>;
}

/// Persists labels as a JSON file
pub struct JsonNameStore {
    path: PathBuf,
}

impl JsonNameStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait::async_trait]
impl NameStore for JsonNameStore {
    async fn load(&self) -> Result<ChannelNames> {
        if !self.path.exists() {
            warn!("Channel names not found at {:?}, using default.", self.path);
            return Ok(ChannelNames::default());
        }

        let names_json = fs::read_to_string(&self.path).await?;
        let names: ChannelNames = serde_json::from_str(&names_json)?;

        info!("Channel names loaded from {:?}", self.path);
        Ok(names.sanitized())
    }

    async fn save(&self, names: &ChannelNames) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            ensure_directory_exists(dir).await?;
        }

        let names_json = match serde_json::to_string_pretty(names) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize channel names to JSON: {}", e);
                return Err(e.into());
            }
        };
        fs::write(&self.path, names_json).await?;

        info!("Channel names saved to {:?}.", self.path);
        Ok(())
    }
}

/// In-process store, mostly for tests and headless runs
#[derive(Default)]
pub struct MemoryNameStore {
    names: Mutex<Option<ChannelNames>>,
}

#[async_trait::async_trait]
impl NameStore for MemoryNameStore {
    async fn load(&self) -> Result<ChannelNames> {
        Ok(self.names.lock().await.clone().unwrap_or_default())
    }

    async fn save(&self, names: &ChannelNames) -> Result<()> {
        *self.names.lock().await = Some(names.clone());
        Ok(())
    }
}
