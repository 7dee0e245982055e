use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::atomic::{remove_if_exists, write_atomic};
use super::cache::FeedCache;
use super::format;
use super::quota;
use super::stub::Stub;
use super::types::{GlobalSettings, StoreError};
use crate::model::{Feed, FeedHandle, FeedId};
use crate::status::LoadStatus;

const STORE_DOCUMENT: &str = "feeds.xml";
const ICON_DIR: &str = "icons";

/// On-disk feed store.
///
/// Every known feed has a [`Stub`] that stays in memory. Full feeds are loaded
/// on demand into a small cache; a feed evicted while someone still holds a
/// handle to it waits in a pending-removal list and is written out once the
/// last holder lets go.
pub struct FeedStore {
    dir: PathBuf,
    settings: GlobalSettings,
    space_factor: f64,
    next_feed_id: u32,
    stubs: BTreeMap<FeedId, Stub>,
    cache: FeedCache,
    pending_removal: Vec<FeedHandle>,
}

impl FeedStore {
    /// Opens the store in `dir`, creating the directory if needed.
    ///
    /// `defaults` seed the global settings until the store document carries
    /// its own. A corrupt store document is an error; corrupt feed documents
    /// are only detected when the feed is first accessed.
    pub fn open(
        dir: impl Into<PathBuf>,
        defaults: GlobalSettings,
        cache_capacity: usize,
    ) -> Result<Self, StoreError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|source| StoreError::Write {
            path: dir.clone(),
            source,
        })?;

        let mut store = Self {
            settings: defaults,
            space_factor: 1.0,
            next_feed_id: 1,
            stubs: BTreeMap::new(),
            cache: FeedCache::new(cache_capacity),
            pending_removal: Vec::new(),
            dir,
        };

        let path = store.dir.join(STORE_DOCUMENT);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(dir = %store.dir.display(), "Starting with an empty feed store");
                return Ok(store);
            }
            Err(source) => return Err(StoreError::Read { path, source }),
        };

        let document = format::decode_store(&bytes)?;
        if let Some(settings) = document.settings {
            store.settings = settings;
        }
        store.space_factor = document.space_factor;
        store.next_feed_id = document.next_feed_id;
        store.stubs = document.stubs.into_iter().map(|s| (s.id, s)).collect();
        tracing::info!(
            dir = %store.dir.display(),
            feeds = store.stubs.len(),
            "Opened feed store"
        );
        Ok(store)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn settings(&self) -> &GlobalSettings {
        &self.settings
    }

    /// Replaces the global settings and saves the store document.
    pub fn set_settings(&mut self, settings: GlobalSettings) -> Result<(), StoreError> {
        self.settings = settings;
        self.save()
    }

    pub fn space_factor(&self) -> f64 {
        self.space_factor
    }

    /// All stubs in id order.
    pub fn stubs(&self) -> impl Iterator<Item = &Stub> {
        self.stubs.values()
    }

    pub fn stub(&self, id: FeedId) -> Option<&Stub> {
        self.stubs.get(&id)
    }

    pub fn find_by_url(&self, url: &str) -> Option<FeedId> {
        self.stubs.values().find(|s| s.url == url).map(|s| s.id)
    }

    /// Subscribed feeds whose regular update interval has elapsed.
    pub fn due_for_update(&self, now: DateTime<Utc>) -> Vec<FeedId> {
        self.stubs
            .values()
            .filter(|s| s.subscribed && s.is_update_due(&self.settings, now))
            .map(|s| s.id)
            .collect()
    }

    // ========================================================================
    // Subscriptions
    // ========================================================================

    /// Adds a feed, or returns the id of the stub already using `url`.
    pub fn subscribe(&mut self, url: &str, title: Option<&str>) -> Result<FeedId, StoreError> {
        if let Some(id) = self.find_by_url(url) {
            if let Some(stub) = self.stubs.get_mut(&id) {
                stub.subscribed = true;
            }
            return Ok(id);
        }

        let id = FeedId(self.next_feed_id);
        self.next_feed_id = self.next_feed_id.saturating_add(1);
        let mut stub = Stub::new(id, url);
        if let Some(title) = title.map(str::trim).filter(|t| !t.is_empty()) {
            stub.title = title.to_string();
        }
        self.stubs.insert(id, stub);
        self.save()?;
        tracing::info!(feed_id = %id, url = %url, "Subscribed");
        Ok(id)
    }

    /// Forgets a feed and deletes its documents and icon.
    pub fn unsubscribe(&mut self, id: FeedId) -> Result<(), StoreError> {
        let stub = self.stubs.remove(&id).ok_or(StoreError::UnknownFeed(id))?;
        self.cache.remove(id);
        self.pending_removal.retain(|h| h.id() != id);

        remove_if_exists(&self.dir.join(stub.document_name()))?;
        if let Some(icon) = &stub.icon_file {
            remove_if_exists(&self.dir.join(icon))?;
        }
        self.save()?;
        tracing::info!(feed_id = %id, url = %stub.url, "Unsubscribed");
        Ok(())
    }

    // ========================================================================
    // Resident feeds
    // ========================================================================

    /// Handle to a feed, loading its document if it is not resident.
    ///
    /// An unreadable or corrupt document yields an empty feed whose status is
    /// `ParsingError`; the document on disk is left alone until the next save.
    pub fn feed(&mut self, id: FeedId) -> Result<FeedHandle, StoreError> {
        self.sweep();
        if let Some(handle) = self.cache.get(id) {
            return Ok(handle.clone());
        }

        let handle = match self.pending_removal.iter().position(|h| h.id() == id) {
            Some(index) => self.pending_removal.swap_remove(index),
            None => {
                let stub = self.stubs.get(&id).ok_or(StoreError::UnknownFeed(id))?;
                match stub.resident() {
                    Some(handle) => handle,
                    None => FeedHandle::new(self.read_feed(id)?),
                }
            }
        };

        if let Some(stub) = self.stubs.get_mut(&id) {
            stub.attach(&handle);
        }
        if let Some(evicted) = self.cache.insert(handle.clone()) {
            self.evict(evicted);
        }
        Ok(handle)
    }

    fn read_feed(&mut self, id: FeedId) -> Result<Feed, StoreError> {
        let stub = self.stubs.get_mut(&id).ok_or(StoreError::UnknownFeed(id))?;
        let path = self.dir.join(stub.document_name());
        let decoded = match std::fs::read(&path) {
            Ok(bytes) => format::decode_feed(&bytes, id),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Feed::new(id, stub.url.clone()));
            }
            Err(source) => Err(StoreError::Read {
                path: path.clone(),
                source,
            }),
        };

        match decoded {
            Ok(mut feed) => {
                if feed.url().is_empty() {
                    feed.set_url(stub.url.clone());
                }
                tracing::debug!(feed_id = %id, entries = feed.entries().len(), "Loaded feed document");
                Ok(feed)
            }
            Err(err) => {
                tracing::warn!(
                    feed_id = %id,
                    path = %path.display(),
                    error = %err,
                    "Feed document unreadable, starting empty"
                );
                stub.status = LoadStatus::ParsingError;
                let mut feed = Feed::new(id, stub.url.clone());
                feed.set_status(LoadStatus::ParsingError);
                Ok(feed)
            }
        }
    }

    fn evict(&mut self, handle: FeedHandle) {
        if handle.holders() > 1 {
            tracing::debug!(feed_id = %handle.id(), "Feed still held, deferring eviction");
            self.pending_removal.push(handle);
            return;
        }
        if let Err(err) = self.persist(&handle) {
            tracing::warn!(feed_id = %handle.id(), error = %err, "Failed to save evicted feed");
        }
    }

    /// Drops one handle and completes any eviction it was blocking.
    pub fn release(&mut self, handle: FeedHandle) {
        drop(handle);
        self.sweep();
    }

    /// Writes out and forgets evicted feeds nobody holds any more.
    pub fn sweep(&mut self) {
        if self.pending_removal.is_empty() {
            return;
        }
        let (released, held): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending_removal)
            .into_iter()
            .partition(|h| h.holders() == 1);
        self.pending_removal = held;
        for handle in released {
            if let Err(err) = self.persist(&handle) {
                tracing::warn!(feed_id = %handle.id(), error = %err, "Failed to save released feed");
            }
        }
    }

    pub fn cached_count(&self) -> usize {
        self.cache.len()
    }

    pub fn pending_removal_count(&self) -> usize {
        self.pending_removal.len()
    }

    /// Applies `change` to a feed, then saves it.
    pub fn modify_feed<R>(
        &mut self,
        id: FeedId,
        change: impl FnOnce(&mut Feed) -> R,
    ) -> Result<R, StoreError> {
        let handle = self.feed(id)?;
        let result = change(&mut handle.write());
        self.persist(&handle)?;
        self.save()?;
        Ok(result)
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    /// Writes the store document.
    pub fn save(&self) -> Result<(), StoreError> {
        let bytes = format::encode_store(
            &self.settings,
            self.space_factor,
            self.next_feed_id,
            self.stubs.values(),
        )?;
        write_atomic(&self.dir.join(STORE_DOCUMENT), &bytes)
    }

    /// Writes one feed's document if the feed is resident.
    pub fn save_feed(&mut self, id: FeedId) -> Result<(), StoreError> {
        let handle = match self.cache.get(id) {
            Some(handle) => Some(handle.clone()),
            None => self.stubs.get(&id).and_then(Stub::resident),
        };
        match handle {
            Some(handle) => self.persist(&handle),
            None => Ok(()),
        }
    }

    /// Writes every resident feed and the store document.
    pub fn save_all(&mut self) -> Result<(), StoreError> {
        let handles: Vec<FeedHandle> = self
            .cache
            .handles()
            .chain(&self.pending_removal)
            .cloned()
            .collect();
        for handle in &handles {
            self.persist(handle)?;
        }
        self.save()
    }

    /// Records the outcome of a load for a stored feed.
    ///
    /// A successful load stamps the update time and saves the feed; every
    /// outcome updates the stub and saves the store document.
    pub fn finish_load(
        &mut self,
        id: FeedId,
        feed: Option<&FeedHandle>,
        status: LoadStatus,
    ) -> Result<(), StoreError> {
        let stub = self.stubs.get_mut(&id).ok_or(StoreError::UnknownFeed(id))?;
        stub.status = status;
        let now = Utc::now();
        if matches!(status, LoadStatus::Ok | LoadStatus::NotModified) {
            stub.last_updated = Some(now);
        }

        if let Some(handle) = feed {
            {
                let mut feed = handle.write();
                feed.set_status(status);
                if matches!(status, LoadStatus::Ok | LoadStatus::NotModified) {
                    feed.set_last_updated(Some(now));
                }
            }
            if status == LoadStatus::Ok {
                self.persist(handle)?;
            } else {
                let feed = handle.read();
                if let Some(stub) = self.stubs.get_mut(&id) {
                    stub.sync_from(&feed);
                }
            }
        }
        self.save()
    }

    /// Stores icon bytes as `icons/<id>.<extension>` and records them on the stub.
    pub fn store_icon(&mut self, id: FeedId, bytes: &[u8], extension: &str) -> Result<(), StoreError> {
        if !self.stubs.contains_key(&id) {
            return Err(StoreError::UnknownFeed(id));
        }
        let icon_dir = self.dir.join(ICON_DIR);
        std::fs::create_dir_all(&icon_dir).map_err(|source| StoreError::Write {
            path: icon_dir.clone(),
            source,
        })?;

        let relative = format!("{ICON_DIR}/{id}.{extension}");
        write_atomic(&self.dir.join(&relative), bytes)?;
        if let Some(stub) = self.stubs.get_mut(&id) {
            if let Some(previous) = stub.icon_file.replace(relative.clone()) {
                if previous != relative {
                    remove_if_exists(&self.dir.join(previous))?;
                }
            }
        }
        tracing::debug!(feed_id = %id, bytes = bytes.len(), "Stored feed icon");
        Ok(())
    }

    fn persist(&mut self, handle: &FeedHandle) -> Result<(), StoreError> {
        let id = handle.id();
        let subscribed = self.stubs.values().filter(|s| s.subscribed).count();
        let budget = quota::feed_budget(self.settings.max_size_bytes(), subscribed, self.space_factor);
        let settings = &self.settings;
        let stub = self.stubs.get_mut(&id).ok_or(StoreError::UnknownFeed(id))?;

        let (bytes, entries, expired) = {
            let mut feed = handle.write();
            let overrides = feed.overrides().clone();
            let expired = feed.expire(
                overrides.max_age_minutes.unwrap_or(settings.max_age_minutes),
                overrides.max_entries.unwrap_or(settings.max_entries),
                Utc::now(),
            );
            let bytes = stub.encode_feed(&mut feed, budget)?;
            stub.sync_from(&feed);
            (bytes, feed.entries().len(), expired)
        };

        write_atomic(&self.dir.join(stub.document_name()), &bytes)?;
        stub.disk_size = bytes.len() as u64;

        let used: u64 = self.stubs.values().map(|s| s.disk_size).sum();
        self.space_factor =
            quota::adjust_factor(self.space_factor, used, self.settings.max_size_bytes());
        tracing::info!(
            feed_id = %id,
            entries,
            expired,
            bytes = bytes.len(),
            "Saved feed"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Entry, ReadStatus};
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn open(dir: &TempDir, capacity: usize) -> FeedStore {
        FeedStore::open(dir.path(), GlobalSettings::default(), capacity).unwrap()
    }

    fn add_entries(handle: &FeedHandle, count: u32) {
        let mut feed = handle.write();
        for n in 1..=count {
            let mut entry = Entry::new();
            entry.set_guid(format!("guid-{n}"));
            entry.title_mut().set_text(format!("Entry {n}"));
            entry.set_published(Utc.with_ymd_and_hms(2024, 1, n, 0, 0, 0).single());
            feed.add_entry(entry);
        }
    }

    #[test]
    fn test_open_empty_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir, 4);
        assert_eq!(store.stubs().count(), 0);
        assert_eq!(store.settings(), &GlobalSettings::default());
    }

    #[test]
    fn test_subscriptions_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = open(&dir, 4);
        let a = store.subscribe("http://example.com/a", Some("A")).unwrap();
        let b = store.subscribe("http://example.com/b", None).unwrap();
        assert_ne!(a, b);
        assert_eq!(store.subscribe("http://example.com/a", None).unwrap(), a);

        let reopened = open(&dir, 4);
        assert_eq!(reopened.stubs().count(), 2);
        assert_eq!(reopened.stub(a).unwrap().title(), "A");
        assert_eq!(reopened.find_by_url("http://example.com/b"), Some(b));
    }

    #[test]
    fn test_persisted_settings_override_seed() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = open(&dir, 4);
        let settings = GlobalSettings {
            max_entries: 50,
            ..GlobalSettings::default()
        };
        store.set_settings(settings.clone()).unwrap();

        let seeded = GlobalSettings {
            max_entries: 7,
            ..GlobalSettings::default()
        };
        let reopened = FeedStore::open(dir.path(), seeded, 4).unwrap();
        assert_eq!(reopened.settings(), &settings);
    }

    #[test]
    fn test_corrupt_store_document_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(STORE_DOCUMENT), b"<store><stub></store>").unwrap();
        assert!(FeedStore::open(dir.path(), GlobalSettings::default(), 4).is_err());
    }

    #[test]
    fn test_eviction_persists_unheld_feed() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = open(&dir, 1);
        let a = store.subscribe("http://example.com/a", None).unwrap();
        let b = store.subscribe("http://example.com/b", None).unwrap();

        let handle = store.feed(a).unwrap();
        add_entries(&handle, 3);
        drop(handle);

        store.feed(b).unwrap();
        assert_eq!(store.cached_count(), 1);
        assert_eq!(store.pending_removal_count(), 0);
        assert!(dir.path().join("feed_1.xml").exists());
        assert_eq!(store.stub(a).unwrap().total_count(), 3);

        // reloaded lazily from disk
        let again = store.feed(a).unwrap();
        assert_eq!(again.read().entries().len(), 3);
    }

    #[test]
    fn test_eviction_of_held_feed_is_deferred() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = open(&dir, 1);
        let a = store.subscribe("http://example.com/a", None).unwrap();
        let b = store.subscribe("http://example.com/b", None).unwrap();

        let held = store.feed(a).unwrap();
        add_entries(&held, 2);
        let _b = store.feed(b).unwrap();
        assert_eq!(store.pending_removal_count(), 1);
        assert!(!dir.path().join("feed_1.xml").exists());

        store.release(held);
        assert_eq!(store.pending_removal_count(), 0);
        assert!(dir.path().join("feed_1.xml").exists());
    }

    #[test]
    fn test_pending_feed_is_reused_on_access() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = open(&dir, 1);
        let a = store.subscribe("http://example.com/a", None).unwrap();
        let b = store.subscribe("http://example.com/b", None).unwrap();

        let held = store.feed(a).unwrap();
        store.feed(b).unwrap();
        let again = store.feed(a).unwrap();
        assert!(again.ptr_eq(&held));
    }

    #[test]
    fn test_corrupt_feed_document_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = open(&dir, 2);
        let id = store.subscribe("http://example.com/a", None).unwrap();
        std::fs::write(dir.path().join("feed_1.xml"), b"<feed><entry>").unwrap();

        let handle = store.feed(id).unwrap();
        assert_eq!(handle.read().entries().len(), 0);
        assert_eq!(handle.read().status(), LoadStatus::ParsingError);
        assert_eq!(store.stub(id).unwrap().status(), LoadStatus::ParsingError);
    }

    #[test]
    fn test_unsubscribe_removes_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = open(&dir, 2);
        let id = store.subscribe("http://example.com/a", None).unwrap();
        let handle = store.feed(id).unwrap();
        add_entries(&handle, 1);
        store.save_feed(id).unwrap();
        store.store_icon(id, b"\x89PNG", "png").unwrap();
        assert!(dir.path().join("icons/1.png").exists());

        store.unsubscribe(id).unwrap();
        assert!(!dir.path().join("feed_1.xml").exists());
        assert!(!dir.path().join("icons/1.png").exists());
        assert!(store.stub(id).is_none());
        assert!(matches!(store.unsubscribe(id), Err(StoreError::UnknownFeed(_))));
    }

    #[test]
    fn test_finish_load_stamps_and_saves() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = open(&dir, 2);
        let id = store.subscribe("http://example.com/a", None).unwrap();
        let handle = store.feed(id).unwrap();
        add_entries(&handle, 2);
        handle.write().set_url("http://example.com/moved");

        store.finish_load(id, Some(&handle), LoadStatus::Ok).unwrap();
        let stub = store.stub(id).unwrap();
        assert!(stub.last_updated().is_some());
        assert_eq!(stub.url(), "http://example.com/moved");
        assert_eq!(stub.unread_count(), 2);

        let reopened = open(&dir, 2);
        assert_eq!(reopened.stub(id).unwrap().url(), "http://example.com/moved");
    }

    #[test]
    fn test_failed_load_keeps_previous_stamp() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = open(&dir, 2);
        let id = store.subscribe("http://example.com/a", None).unwrap();
        store.finish_load(id, None, LoadStatus::LoadingError).unwrap();
        let stub = store.stub(id).unwrap();
        assert_eq!(stub.status(), LoadStatus::LoadingError);
        assert!(stub.last_updated().is_none());
    }

    #[test]
    fn test_modify_feed_marks_entries() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = open(&dir, 2);
        let id = store.subscribe("http://example.com/a", None).unwrap();
        let handle = store.feed(id).unwrap();
        add_entries(&handle, 3);
        let first = handle.read().entries()[0].id();
        drop(handle);

        store
            .modify_feed(id, |feed| feed.set_entry_status(first, ReadStatus::Read))
            .unwrap();
        let changed = store.modify_feed(id, Feed::mark_all_read).unwrap();
        assert_eq!(changed, 2);
        assert_eq!(store.stub(id).unwrap().unread_count(), 0);
    }

    #[test]
    fn test_expiry_applies_on_save() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = open(&dir, 2);
        store
            .set_settings(GlobalSettings {
                max_entries: 2,
                ..GlobalSettings::default()
            })
            .unwrap();
        let id = store.subscribe("http://example.com/a", None).unwrap();
        let handle = store.feed(id).unwrap();
        add_entries(&handle, 5);
        store.save_feed(id).unwrap();
        assert_eq!(handle.read().entries().len(), 2);
        assert_eq!(store.stub(id).unwrap().total_count(), 2);
    }

    #[test]
    fn test_due_for_update_skips_recent_feeds() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = open(&dir, 2);
        let fresh = store.subscribe("http://example.com/a", None).unwrap();
        let stale = store.subscribe("http://example.com/b", None).unwrap();
        store.finish_load(fresh, None, LoadStatus::Ok).unwrap();
        assert_eq!(store.due_for_update(Utc::now()), vec![stale]);
    }
}
