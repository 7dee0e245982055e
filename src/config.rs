//! Configuration file parser for `~/.config/feedengine/config.toml`.
//!
//! The config file is optional; a missing file yields `Config::default()`.
//! Unknown keys are accepted but logged, since they are usually typos.
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::loader::LoaderConfig;
use crate::storage::GlobalSettings;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file too large: {0}")]
    TooLarge(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level engine configuration.
///
/// Every key is optional. `defaults` only seeds the global settings of a
/// new store; once the store document holds settings, those win.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Store directory. `None` means `$HOME/.local/share/feedengine`.
    pub store_dir: Option<PathBuf>,

    pub max_concurrent_loads: usize,

    /// Seconds a load may wait for its first byte.
    pub load_timeout_secs: u64,

    pub icon_timeout_secs: u64,

    pub fetch_icons: bool,

    /// Feeds kept resident in memory besides those still in use.
    pub feed_cache_capacity: usize,

    pub user_agent: String,

    pub defaults: GlobalSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store_dir: None,
            max_concurrent_loads: 4,
            load_timeout_secs: 30,
            icon_timeout_secs: 10,
            fetch_icons: true,
            feed_cache_capacity: 10,
            user_agent: concat!("feedengine/", env!("CARGO_PKG_VERSION")).to_string(),
            defaults: GlobalSettings::default(),
        }
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 8] = [
        "store_dir",
        "max_concurrent_loads",
        "load_timeout_secs",
        "icon_timeout_secs",
        "fetch_icons",
        "feed_cache_capacity",
        "user_agent",
        "defaults",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing or empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        tracing::info!(
            path = %path.display(),
            max_concurrent_loads = config.max_concurrent_loads,
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Scheduler settings. A concurrency of 0 is treated as 1.
    pub fn loader(&self) -> LoaderConfig {
        LoaderConfig {
            max_concurrent_loads: self.max_concurrent_loads.max(1),
            load_timeout: Duration::from_secs(self.load_timeout_secs),
            icon_timeout: Duration::from_secs(self.icon_timeout_secs),
            fetch_icons: self.fetch_icons,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
