use chrono::{DateTime, Duration, Utc};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use super::bindings::ScriptBindings;
use super::content::Content;
use super::entry::{Entry, EntryId, ReadStatus};
use super::link::{Link, LinkRelation};
use super::person::Person;
use crate::status::LoadStatus;

/// Engine-wide feed identifier, allocated by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct FeedId(pub u32);

impl fmt::Display for FeedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Conditional-request validators remembered from the last response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpValidators {
    pub last_modified: Option<String>,
    pub etag: Option<String>,
}

impl HttpValidators {
    pub fn is_empty(&self) -> bool {
        self.last_modified.is_none() && self.etag.is_none()
    }
}

/// Per-feed settings. `None` falls back to the global default.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedOverrides {
    pub max_age_minutes: Option<u32>,
    pub max_entries: Option<u32>,
    pub update_interval_minutes: Option<u32>,
    pub min_update_interval_minutes: Option<u32>,
    pub show_images: Option<bool>,
    pub show_permalink: Option<bool>,
    pub prefetch_linked_article: Option<bool>,
}

/// Result of [`Feed::add_entry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Added(EntryId),
    /// A newer version of a known entry replaced it, keeping its id.
    Replaced(EntryId),
    /// Same item with an equal or older date; nothing changed.
    Rejected,
}

impl AddOutcome {
    pub fn entry_id(self) -> Option<EntryId> {
        match self {
            AddOutcome::Added(id) | AddOutcome::Replaced(id) => Some(id),
            AddOutcome::Rejected => None,
        }
    }
}

/// A subscribed or transiently loaded RSS/Atom source and its entries.
///
/// Entries are kept newest first. Counters are derived from the entry list,
/// so they can never disagree with it.
#[derive(Debug, Clone)]
pub struct Feed {
    id: FeedId,
    url: String,
    title: Content,
    tagline: Content,
    link: Link,
    author: Person,
    icon: Option<String>,
    entries: Vec<Entry>,
    next_entry_id: u32,
    overrides: FeedOverrides,
    validators: HttpValidators,
    status: LoadStatus,
    space_limited: bool,
    last_updated: Option<DateTime<Utc>>,
    bindings: ScriptBindings,
}

impl Feed {
    pub fn new(id: FeedId, url: impl Into<String>) -> Self {
        Self {
            id,
            url: url.into(),
            title: Content::new(),
            tagline: Content::new(),
            link: Link::new(LinkRelation::Alternate),
            author: Person::default(),
            icon: None,
            entries: Vec::new(),
            next_entry_id: 1,
            overrides: FeedOverrides::default(),
            validators: HttpValidators::default(),
            status: LoadStatus::Ok,
            space_limited: false,
            last_updated: None,
            bindings: ScriptBindings::default(),
        }
    }

    pub fn id(&self) -> FeedId {
        self.id
    }

    /// Canonical URL the feed is fetched from.
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn set_url(&mut self, url: impl Into<String>) {
        self.url = url.into();
    }

    pub fn title(&self) -> &Content {
        &self.title
    }

    pub fn title_mut(&mut self) -> &mut Content {
        &mut self.title
    }

    pub fn tagline(&self) -> &Content {
        &self.tagline
    }

    pub fn tagline_mut(&mut self) -> &mut Content {
        &mut self.tagline
    }

    /// Link to the site the feed belongs to.
    pub fn link(&self) -> &Link {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut Link {
        &mut self.link
    }

    pub fn author(&self) -> &Person {
        &self.author
    }

    pub fn author_mut(&mut self) -> &mut Person {
        &mut self.author
    }

    pub fn icon(&self) -> Option<&str> {
        self.icon.as_deref()
    }

    pub fn set_icon(&mut self, icon: Option<String>) {
        self.icon = icon.filter(|i| !i.trim().is_empty());
    }

    pub fn overrides(&self) -> &FeedOverrides {
        &self.overrides
    }

    pub fn overrides_mut(&mut self) -> &mut FeedOverrides {
        &mut self.overrides
    }

    pub fn validators(&self) -> &HttpValidators {
        &self.validators
    }

    pub fn set_validators(&mut self, validators: HttpValidators) {
        self.validators = validators;
    }

    pub fn status(&self) -> LoadStatus {
        self.status
    }

    pub fn set_status(&mut self, status: LoadStatus) {
        self.status = status;
    }

    /// Set when the last save had to drop entries to stay within the disk budget.
    pub fn is_space_limited(&self) -> bool {
        self.space_limited
    }

    pub fn set_space_limited(&mut self, limited: bool) {
        self.space_limited = limited;
    }

    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.last_updated
    }

    pub fn set_last_updated(&mut self, when: Option<DateTime<Utc>>) {
        self.last_updated = when;
    }

    pub fn bindings(&self) -> &ScriptBindings {
        &self.bindings
    }

    pub fn bindings_mut(&mut self) -> &mut ScriptBindings {
        &mut self.bindings
    }

    /// All entries, newest first, including deleted tombstones.
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// Entries that are not deleted, newest first.
    pub fn visible_entries(&self) -> impl Iterator<Item = &Entry> {
        self.entries.iter().filter(|e| !e.is_deleted())
    }

    pub fn entry(&self, id: EntryId) -> Option<&Entry> {
        self.entries.iter().find(|e| e.id() == id)
    }

    /// Number of entries that are not deleted.
    pub fn total_count(&self) -> usize {
        self.visible_entries().count()
    }

    pub fn unread_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_unread()).count()
    }

    pub fn read_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.status() == ReadStatus::Read)
            .count()
    }

    /// Id the next inserted entry will receive.
    pub fn next_entry_id(&self) -> EntryId {
        EntryId(self.next_entry_id)
    }

    /// Inserts `entry` at its chronological position, reconciling duplicates.
    ///
    /// A known item (see [`Entry::is_same_item`]) with an equal or older date
    /// is rejected. A newer version replaces the stored one and inherits its
    /// id, read status, keep flag and script bindings.
    pub fn add_entry(&mut self, mut entry: Entry) -> AddOutcome {
        if let Some(index) = self.entries.iter().position(|e| e.is_same_item(&entry)) {
            if entry.published() <= self.entries[index].published() {
                return AddOutcome::Rejected;
            }

            let mut old = self.entries.remove(index);
            let id = old.id();
            entry.set_id(id);
            entry.set_keep(old.keep());
            entry.set_bindings(old.take_bindings());
            entry.set_status(old.status());
            self.insert_sorted(entry);
            return AddOutcome::Replaced(id);
        }

        let id = EntryId(self.next_entry_id);
        self.next_entry_id = self.next_entry_id.saturating_add(1);
        entry.set_id(id);
        self.insert_sorted(entry);
        AddOutcome::Added(id)
    }

    /// Inserts an entry restored from storage, keeping its stored id.
    pub(crate) fn restore_entry(&mut self, entry: Entry) {
        self.next_entry_id = self.next_entry_id.max(entry.id().0.saturating_add(1));
        self.insert_sorted(entry);
    }

    pub(crate) fn set_next_entry_id(&mut self, next: u32) {
        self.next_entry_id = self.next_entry_id.max(next);
    }

    // Entries with the same date keep arrival order; undated entries sort last.
    fn insert_sorted(&mut self, entry: Entry) {
        let published = entry.published();
        let index = self
            .entries
            .iter()
            .position(|e| e.published() < published)
            .unwrap_or(self.entries.len());
        self.entries.insert(index, entry);
    }

    pub fn set_entry_status(&mut self, id: EntryId, status: ReadStatus) -> bool {
        match self.entries.iter_mut().find(|e| e.id() == id) {
            Some(entry) => {
                entry.set_status(status);
                true
            }
            None => false,
        }
    }

    pub fn set_entry_keep(&mut self, id: EntryId, keep: bool) -> bool {
        match self.entries.iter_mut().find(|e| e.id() == id) {
            Some(entry) => {
                entry.set_keep(keep);
                true
            }
            None => false,
        }
    }

    /// Marks every non-deleted entry as read. Returns how many changed.
    pub fn mark_all_read(&mut self) -> usize {
        let mut changed = 0;
        for entry in self.entries.iter_mut().filter(|e| e.is_unread()) {
            entry.set_status(ReadStatus::Read);
            changed += 1;
        }
        changed
    }

    /// Removes an entry outright. Handles to it stop resolving.
    pub fn remove_entry(&mut self, id: EntryId) -> Option<Entry> {
        let index = self.entries.iter().position(|e| e.id() == id)?;
        Some(self.entries.remove(index))
    }

    /// Keeps only entries for which `keep` returns true; returns the removed count.
    pub fn retain_entries(&mut self, mut keep: impl FnMut(&Entry) -> bool) -> usize {
        let before = self.entries.len();
        self.entries.retain(|e| keep(e));
        before - self.entries.len()
    }

    /// Drops entries older than `max_age_minutes` and entries beyond the newest
    /// `max_entries`. Keep-flagged entries always survive; 0 disables a limit.
    pub fn expire(&mut self, max_age_minutes: u32, max_entries: u32, now: DateTime<Utc>) -> usize {
        let cutoff = (max_age_minutes > 0).then(|| now - Duration::minutes(i64::from(max_age_minutes)));
        let mut seen = 0_u32;
        self.retain_entries(|entry| {
            if entry.keep() {
                return true;
            }
            if let (Some(cutoff), Some(published)) = (cutoff, entry.published()) {
                if published < cutoff {
                    return false;
                }
            }
            if entry.is_deleted() {
                return true;
            }
            seen += 1;
            max_entries == 0 || seen <= max_entries
        })
    }
}

/// Shared, lockable handle to a resident [`Feed`].
///
/// The number of live handles is the feed's reference count; the store uses
/// it to decide whether a feed can leave memory.
#[derive(Clone)]
pub struct FeedHandle {
    id: FeedId,
    inner: Arc<RwLock<Feed>>,
}

impl FeedHandle {
    pub fn new(feed: Feed) -> Self {
        Self {
            id: feed.id(),
            inner: Arc::new(RwLock::new(feed)),
        }
    }

    pub fn id(&self) -> FeedId {
        self.id
    }

    /// Read access. A poisoned lock is recovered; feed invariants hold between calls.
    pub fn read(&self) -> RwLockReadGuard<'_, Feed> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, Feed> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of live handles, this one included.
    pub fn holders(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    pub fn downgrade(&self) -> WeakFeed {
        WeakFeed {
            inner: Arc::downgrade(&self.inner),
            id: self.id,
        }
    }

    pub fn ptr_eq(&self, other: &FeedHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Clone of one entry, if it still exists.
    pub fn entry(&self, id: EntryId) -> Option<Entry> {
        self.read().entry(id).cloned()
    }
}

impl fmt::Debug for FeedHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeedHandle")
            .field("id", &self.id)
            .field("holders", &self.holders())
            .finish()
    }
}

/// Non-owning reference to a feed, held by its stub.
#[derive(Debug, Clone, Default)]
pub struct WeakFeed {
    inner: Weak<RwLock<Feed>>,
    id: FeedId,
}

impl WeakFeed {
    pub fn upgrade(&self) -> Option<FeedHandle> {
        self.inner.upgrade().map(|inner| FeedHandle { id: self.id, inner })
    }

    pub fn is_resident(&self) -> bool {
        self.inner.strong_count() > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn at(day: u32) -> Option<DateTime<Utc>> {
        Utc.with_ymd_and_hms(2024, 3, day, 8, 0, 0).single()
    }

    fn entry(guid: &str, day: u32, body: &str) -> Entry {
        let mut e = Entry::new();
        e.set_guid(guid);
        e.title_mut().set_text(format!("title {guid}"));
        e.content_mut().set_text(body);
        e.set_published(at(day));
        e
    }

    fn feed() -> Feed {
        Feed::new(FeedId(1), "http://example.com/rss")
    }

    #[test]
    fn test_entries_sorted_newest_first() {
        let mut f = feed();
        f.add_entry(entry("a", 2, ""));
        f.add_entry(entry("b", 5, ""));
        f.add_entry(entry("c", 3, ""));
        let guids: Vec<_> = f.entries().iter().filter_map(|e| e.guid()).collect();
        assert_eq!(guids, vec!["b", "c", "a"]);
    }

    #[test]
    fn test_ids_are_sequential() {
        let mut f = feed();
        assert_eq!(f.add_entry(entry("a", 1, "")), AddOutcome::Added(EntryId(1)));
        assert_eq!(f.add_entry(entry("b", 1, "")), AddOutcome::Added(EntryId(2)));
        f.remove_entry(EntryId(2));
        assert_eq!(f.add_entry(entry("c", 1, "")), AddOutcome::Added(EntryId(3)));
    }

    #[test]
    fn test_duplicate_same_date_rejected() {
        let mut f = feed();
        f.add_entry(entry("a", 2, "first"));
        assert_eq!(f.add_entry(entry("a", 2, "second")), AddOutcome::Rejected);
        assert_eq!(f.add_entry(entry("a", 1, "older")), AddOutcome::Rejected);
        assert_eq!(f.entries().len(), 1);
        assert_eq!(f.entries()[0].content().as_text(), Some("first"));
    }

    #[test]
    fn test_newer_duplicate_replaces_and_keeps_status() {
        let mut f = feed();
        let id = f.add_entry(entry("a", 2, "first")).entry_id().unwrap();
        f.add_entry(entry("b", 3, ""));
        f.set_entry_status(id, ReadStatus::Read);
        f.set_entry_keep(id, true);

        assert_eq!(f.add_entry(entry("a", 4, "updated")), AddOutcome::Replaced(id));
        assert_eq!(f.entries().len(), 2);
        let replaced = f.entry(id).unwrap();
        assert_eq!(replaced.content().as_text(), Some("updated"));
        assert_eq!(replaced.status(), ReadStatus::Read);
        assert!(replaced.keep());
        // moved to its new chronological slot
        assert_eq!(f.entries()[0].id(), id);
    }

    #[test]
    fn test_counters_follow_statuses() {
        let mut f = feed();
        let a = f.add_entry(entry("a", 1, "")).entry_id().unwrap();
        let b = f.add_entry(entry("b", 2, "")).entry_id().unwrap();
        f.add_entry(entry("c", 3, ""));
        assert_eq!((f.total_count(), f.unread_count()), (3, 3));

        f.set_entry_status(a, ReadStatus::Read);
        f.set_entry_status(b, ReadStatus::Deleted);
        assert_eq!(f.total_count(), 2);
        assert_eq!(f.unread_count(), 1);
        assert_eq!(f.read_count(), 1);
    }

    #[test]
    fn test_deleted_tombstone_blocks_refetch() {
        let mut f = feed();
        let id = f.add_entry(entry("a", 1, "body")).entry_id().unwrap();
        f.set_entry_status(id, ReadStatus::Deleted);
        assert_eq!(f.add_entry(entry("a", 1, "body")), AddOutcome::Rejected);
        assert_eq!(f.total_count(), 0);
    }

    #[test]
    fn test_expire_respects_keep() {
        let mut f = feed();
        for day in 1..=6 {
            f.add_entry(entry(&format!("e{day}"), day, ""));
        }
        let kept = f.entries().last().unwrap().id();
        f.set_entry_keep(kept, true);

        let removed = f.expire(0, 3, at(10).unwrap());
        assert_eq!(removed, 2);
        assert!(f.entry(kept).is_some());
        assert_eq!(f.total_count(), 4);
    }

    #[test]
    fn test_expire_by_age() {
        let mut f = feed();
        f.add_entry(entry("old", 1, ""));
        f.add_entry(entry("new", 9, ""));
        let removed = f.expire(24 * 60 * 2, 0, at(10).unwrap());
        assert_eq!(removed, 1);
        assert_eq!(f.entries()[0].guid(), Some("new"));
    }

    #[test]
    fn test_handle_counts_holders() {
        let handle = FeedHandle::new(feed());
        assert_eq!(handle.holders(), 1);
        let weak = handle.downgrade();
        let second = weak.upgrade().unwrap();
        assert_eq!(handle.holders(), 2);
        assert!(second.ptr_eq(&handle));
        drop(second);
        drop(handle);
        assert!(!weak.is_resident());
    }

    proptest! {
        #[test]
        fn prop_insertion_keeps_newest_first(days in proptest::collection::vec(1u32..28, 1..40)) {
            let mut f = feed();
            for (i, day) in days.iter().enumerate() {
                f.add_entry(entry(&format!("g{i}"), *day, ""));
            }
            let dates: Vec<_> = f.entries().iter().map(|e| e.published()).collect();
            prop_assert!(dates.windows(2).all(|w| w[0] >= w[1]));
            prop_assert_eq!(f.entries().len(), days.len());
        }

        #[test]
        fn prop_readding_never_grows(days in proptest::collection::vec(1u32..28, 1..20)) {
            let mut f = feed();
            for (i, day) in days.iter().enumerate() {
                f.add_entry(entry(&format!("g{i}"), *day, "x"));
            }
            let before = f.entries().len();
            for (i, day) in days.iter().enumerate() {
                prop_assert_eq!(f.add_entry(entry(&format!("g{i}"), *day, "y")), AddOutcome::Rejected);
            }
            prop_assert_eq!(f.entries().len(), before);
            prop_assert!(f.entries().iter().all(|e| e.content().as_text() == Some("x")));
        }
    }
}
