//! Console configuration (`console.toml`).
//!
//! Fail-safe like the rest of the persisted state: a missing file yields the
//! defaults, and missing keys inside the file fall back individually.

use color_eyre::eyre::{eyre, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

use crate::device::topics::TopicMap;

pub const CONFIG_FILE: &str = "console.toml";

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct TimingConfig {
    /// Upper bound for the connect handshake
    pub connect_timeout_secs: u64,
    /// Delay of the single pending reconnect
    pub reconnect_delay_secs: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 5,
            reconnect_delay_secs: 2,
        }
    }
}

impl TimingConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs.max(1))
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct ConsoleConfig {
    pub topics: TopicMap,
    pub timing: TimingConfig,
    /// Buffered console events per subscriber before the slowest one lags
    pub event_capacity: usize,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            topics: TopicMap::default(),
            timing: TimingConfig::default(),
            event_capacity: 256,
        }
    }
}

impl ConsoleConfig {
    pub async fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(CONFIG_FILE);
        if !tokio::fs::try_exists(&path)
            .await
            .map_err(|e| eyre!("Failed to check if {} exists: {}", path.display(), e))?
        {
            warn!("{} does not exist, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| eyre!("Failed to read {}: {}", path.display(), e))?;
        let config = toml::from_str(&content)
            .map_err(|e| eyre!("Failed to parse {}: {}", path.display(), e))?;
        info!("Loaded console config from {}", path.display());
        Ok(config)
    }
}
