use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

use crate::model::FeedId;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to read '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The previous copy of the file is untouched.
    #[error("Failed to write '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed store document: {0}")]
    Malformed(String),

    #[error("Failed to encode store document: {0}")]
    Encode(String),

    #[error("Unknown feed id {0}")]
    UnknownFeed(FeedId),
}

impl From<quick_xml::Error> for StoreError {
    fn from(err: quick_xml::Error) -> Self {
        StoreError::Malformed(err.to_string())
    }
}

impl From<quick_xml::events::attributes::AttrError> for StoreError {
    fn from(err: quick_xml::events::attributes::AttrError) -> Self {
        StoreError::Malformed(err.to_string())
    }
}

// ============================================================================
// Global settings
// ============================================================================

/// Engine-wide defaults, persisted in the store document.
///
/// Feed overrides take precedence; 0 disables a size, age or count limit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalSettings {
    /// Disk budget for all feed documents, in KiB.
    pub max_size_kb: u64,
    pub max_age_minutes: u32,
    pub max_entries: u32,
    pub update_interval_minutes: u32,
    /// Updates requested sooner than this after the last one are postponed.
    pub min_update_interval_minutes: u32,
    pub show_images: bool,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            max_size_kb: 0,
            max_age_minutes: 0,
            max_entries: 0,
            update_interval_minutes: 60,
            min_update_interval_minutes: 5,
            show_images: true,
        }
    }
}

impl GlobalSettings {
    /// Disk budget in bytes, `None` when unlimited.
    pub fn max_size_bytes(&self) -> Option<u64> {
        (self.max_size_kb > 0).then(|| self.max_size_kb.saturating_mul(1024))
    }
}
