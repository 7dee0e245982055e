use chrono::{DateTime, Duration, Utc};

use super::format;
use super::types::{GlobalSettings, StoreError};
use crate::model::{Feed, FeedHandle, FeedId, FeedOverrides, WeakFeed};
use crate::status::LoadStatus;

/// Always-resident summary of a known feed.
///
/// Listing feeds, scheduling updates and enforcing the disk budget only need
/// stubs; the full [`Feed`] is loaded on demand and referenced weakly here.
#[derive(Debug, Clone)]
pub struct Stub {
    pub(crate) id: FeedId,
    pub(crate) url: String,
    pub(crate) title: String,
    pub(crate) total_count: usize,
    pub(crate) unread_count: usize,
    pub(crate) last_updated: Option<DateTime<Utc>>,
    /// Path of the stored icon, relative to the store directory.
    pub(crate) icon_file: Option<String>,
    pub(crate) subscribed: bool,
    pub(crate) status: LoadStatus,
    pub(crate) overrides: FeedOverrides,
    pub(crate) space_limited: bool,
    /// Size of the feed document written by the last save.
    pub(crate) disk_size: u64,
    pub(crate) feed: WeakFeed,
}

impl Stub {
    pub(crate) fn new(id: FeedId, url: impl Into<String>) -> Self {
        Self {
            id,
            url: url.into(),
            title: String::new(),
            total_count: 0,
            unread_count: 0,
            last_updated: None,
            icon_file: None,
            subscribed: true,
            status: LoadStatus::Ok,
            overrides: FeedOverrides::default(),
            space_limited: false,
            disk_size: 0,
            feed: WeakFeed::default(),
        }
    }

    pub fn id(&self) -> FeedId {
        self.id
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Feed title, or the URL for feeds never loaded.
    pub fn title(&self) -> &str {
        if self.title.is_empty() {
            &self.url
        } else {
            &self.title
        }
    }

    pub fn total_count(&self) -> usize {
        self.total_count
    }

    pub fn unread_count(&self) -> usize {
        self.unread_count
    }

    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.last_updated
    }

    pub fn icon_file(&self) -> Option<&str> {
        self.icon_file.as_deref()
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscribed
    }

    pub fn status(&self) -> LoadStatus {
        self.status
    }

    pub fn overrides(&self) -> &FeedOverrides {
        &self.overrides
    }

    pub fn is_space_limited(&self) -> bool {
        self.space_limited
    }

    /// The feed, if some holder keeps it in memory.
    pub fn resident(&self) -> Option<FeedHandle> {
        self.feed.upgrade()
    }

    pub(crate) fn attach(&mut self, handle: &FeedHandle) {
        self.feed = handle.downgrade();
    }

    /// Copies the summary fields from a resident feed.
    pub(crate) fn sync_from(&mut self, feed: &Feed) {
        self.url = feed.url().to_string();
        if let Some(title) = feed.title().as_text().map(str::trim).filter(|t| !t.is_empty()) {
            self.title = title.to_string();
        }
        self.total_count = feed.total_count();
        self.unread_count = feed.unread_count();
        self.overrides = feed.overrides().clone();
        self.space_limited = feed.is_space_limited();
        self.status = feed.status();
        if feed.last_updated().is_some() {
            self.last_updated = feed.last_updated();
        }
    }

    pub fn update_interval_minutes(&self, settings: &GlobalSettings) -> u32 {
        self.overrides
            .update_interval_minutes
            .unwrap_or(settings.update_interval_minutes)
    }

    pub fn min_update_interval_minutes(&self, settings: &GlobalSettings) -> u32 {
        self.overrides
            .min_update_interval_minutes
            .unwrap_or(settings.min_update_interval_minutes)
    }

    /// True when the regular update interval has elapsed.
    pub fn is_update_due(&self, settings: &GlobalSettings, now: DateTime<Utc>) -> bool {
        elapsed(self.last_updated, self.update_interval_minutes(settings), now)
    }

    /// True when an update requested now must wait for the minimum interval.
    pub fn is_refresh_postponed(&self, settings: &GlobalSettings, now: DateTime<Utc>) -> bool {
        !elapsed(self.last_updated, self.min_update_interval_minutes(settings), now)
    }

    pub(crate) fn document_name(&self) -> String {
        format!("feed_{}.xml", self.id)
    }

    /// Serializes `feed` within `budget` bytes.
    ///
    /// Entries that did not fit are removed from `feed` as well, so memory and
    /// disk agree, and the feed's space-limited flag is updated.
    pub(crate) fn encode_feed(&self, feed: &mut Feed, budget: Option<u64>) -> Result<Vec<u8>, StoreError> {
        let encoded = format::encode_feed(feed, budget)?;
        if !encoded.dropped.is_empty() {
            feed.retain_entries(|entry| !encoded.dropped.contains(&entry.id()));
            tracing::debug!(
                feed_id = %self.id,
                dropped = encoded.dropped.len(),
                "Entries dropped to stay within the disk budget"
            );
        }
        feed.set_space_limited(encoded.space_limited);
        Ok(encoded.bytes)
    }
}

fn elapsed(since: Option<DateTime<Utc>>, minutes: u32, now: DateTime<Utc>) -> bool {
    match since {
        Some(since) => now - since >= Duration::minutes(i64::from(minutes)),
        None => true,
    }
}
