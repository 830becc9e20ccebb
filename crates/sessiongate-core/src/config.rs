//! Application configuration management.
//!
//! This module handles loading and saving the application configuration:
//! API base URL, last used username, inactivity window, refresh timeout,
//! and which durable backend holds remembered sessions.
//!
//! Configuration is stored at `~/.config/sessiongate/config.json`.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::refresh::DEFAULT_REFRESH_TIMEOUT;
use crate::watchdog::DEFAULT_INACTIVITY_WINDOW;

/// Application name used for config/data directory paths
const APP_NAME: &str = "sessiongate";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Environment variable overriding the API base URL
pub const API_BASE_ENV: &str = "SESSIONGATE_API_BASE";

/// API base used when neither the environment nor the config file set one
const DEFAULT_API_BASE: &str = "http://localhost:8000/api";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    pub api_base: Option<String>,
    pub last_username: Option<String>,
    pub inactivity_minutes: Option<u64>,
    /// 0 disables the refresh timeout.
    pub refresh_timeout_secs: Option<u64>,
    /// Keep remembered sessions in the OS keychain instead of a file.
    #[serde(default)]
    pub use_keyring: bool,
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            Ok(serde_json::from_str(&contents)?)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Directory holding the durable session file.
    pub fn data_dir(&self) -> Result<PathBuf> {
        let data_dir = dirs::data_local_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;
        Ok(data_dir.join(APP_NAME))
    }

    /// Environment first, then the config file, then the default.
    pub fn api_base(&self) -> String {
        std::env::var(API_BASE_ENV)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .or_else(|| self.api_base.clone())
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string())
    }

    pub fn inactivity_window(&self) -> Duration {
        match self.inactivity_minutes {
            Some(minutes) if minutes > 0 => Duration::from_secs(minutes * 60),
            _ => DEFAULT_INACTIVITY_WINDOW,
        }
    }

    pub fn refresh_timeout(&self) -> Option<Duration> {
        match self.refresh_timeout_secs {
            Some(0) => None,
            Some(secs) => Some(Duration::from_secs(secs)),
            None => Some(DEFAULT_REFRESH_TIMEOUT),
        }
    }
}
