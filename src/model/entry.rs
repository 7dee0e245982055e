use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;

use super::bindings::ScriptBindings;
use super::content::Content;
use super::link::{Link, LinkRelation};
use super::person::Person;

/// Per-feed sequential entry identifier. Never reused within a feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct EntryId(pub u32);

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ReadStatus {
    #[default]
    Unread,
    Read,
    /// Removed by the user; kept as a tombstone so a refetch does not resurrect it.
    Deleted,
}

impl ReadStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ReadStatus::Unread => "unread",
            ReadStatus::Read => "read",
            ReadStatus::Deleted => "deleted",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "unread" => Some(ReadStatus::Unread),
            "read" => Some(ReadStatus::Read),
            "deleted" => Some(ReadStatus::Deleted),
            _ => None,
        }
    }
}

/// One item or post of a feed.
///
/// Entries are owned by their [`Feed`](super::Feed). Code outside the feed
/// refers to an entry by `(FeedId, EntryId)`, so an entry removed from its
/// feed simply stops resolving.
#[derive(Debug, Clone, Default)]
pub struct Entry {
    id: EntryId,
    guid: Option<String>,
    title: Content,
    content: Content,
    author: Person,
    published: Option<DateTime<Utc>>,
    status: ReadStatus,
    keep: bool,
    links: Vec<Link>,
    properties: BTreeMap<String, String>,
    bindings: ScriptBindings,
}

impl Entry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assigned by the owning feed on insertion.
    pub fn id(&self) -> EntryId {
        self.id
    }

    pub(crate) fn set_id(&mut self, id: EntryId) {
        self.id = id;
    }

    pub fn guid(&self) -> Option<&str> {
        self.guid.as_deref()
    }

    /// Sets the globally unique identifier. Blank values clear it.
    pub fn set_guid(&mut self, guid: impl Into<String>) {
        let guid = guid.into();
        let trimmed = guid.trim();
        self.guid = if trimmed.is_empty() {
            None
        } else if trimmed.len() == guid.len() {
            Some(guid)
        } else {
            Some(trimmed.to_string())
        };
    }

    pub fn title(&self) -> &Content {
        &self.title
    }

    pub fn title_mut(&mut self) -> &mut Content {
        &mut self.title
    }

    pub fn content(&self) -> &Content {
        &self.content
    }

    pub fn content_mut(&mut self) -> &mut Content {
        &mut self.content
    }

    pub fn author(&self) -> &Person {
        &self.author
    }

    pub fn author_mut(&mut self) -> &mut Person {
        &mut self.author
    }

    pub fn published(&self) -> Option<DateTime<Utc>> {
        self.published
    }

    pub fn set_published(&mut self, published: Option<DateTime<Utc>>) {
        self.published = published;
    }

    pub fn status(&self) -> ReadStatus {
        self.status
    }

    pub fn set_status(&mut self, status: ReadStatus) {
        self.status = status;
        if status == ReadStatus::Deleted {
            self.content.clear_value();
        }
    }

    pub fn is_unread(&self) -> bool {
        self.status == ReadStatus::Unread
    }

    pub fn is_deleted(&self) -> bool {
        self.status == ReadStatus::Deleted
    }

    /// Keep-flagged entries are exempt from expiry and quota eviction.
    pub fn keep(&self) -> bool {
        self.keep
    }

    pub fn set_keep(&mut self, keep: bool) {
        self.keep = keep;
    }

    pub fn links(&self) -> &[Link] {
        &self.links
    }

    pub fn add_link(&mut self, relation: LinkRelation) -> &mut Link {
        self.links.push(Link::new(relation));
        let last = self.links.len() - 1;
        &mut self.links[last]
    }

    pub fn push_link(&mut self, link: Link) {
        self.links.push(link);
    }

    /// The single alternate link used by RSS items, created on first access.
    pub fn alternate_link_mut(&mut self) -> &mut Link {
        match self
            .links
            .iter()
            .position(|l| l.relation == LinkRelation::Alternate)
        {
            Some(index) => &mut self.links[index],
            None => self.add_link(LinkRelation::Alternate),
        }
    }

    /// First alternate link with a URI, else the first link with a URI.
    pub fn primary_link(&self) -> Option<&str> {
        self.links
            .iter()
            .find(|l| l.relation == LinkRelation::Alternate && l.has_uri())
            .or_else(|| self.links.iter().find(|l| l.has_uri()))
            .map(|l| l.uri.as_str())
    }

    pub fn enclosures(&self) -> impl Iterator<Item = &Link> {
        self.links
            .iter()
            .filter(|l| l.relation == LinkRelation::Enclosure)
    }

    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties.get(name).map(String::as_str)
    }

    pub fn set_property(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.properties.insert(name.into(), value.into());
    }

    pub fn remove_property(&mut self, name: &str) -> Option<String> {
        self.properties.remove(name)
    }

    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    pub fn bindings(&self) -> &ScriptBindings {
        &self.bindings
    }

    pub fn bindings_mut(&mut self) -> &mut ScriptBindings {
        &mut self.bindings
    }

    pub(crate) fn take_bindings(&mut self) -> ScriptBindings {
        std::mem::take(&mut self.bindings)
    }

    pub(crate) fn set_bindings(&mut self, bindings: ScriptBindings) {
        self.bindings = bindings;
    }

    /// Duplicate test used when entries are added to a feed.
    ///
    /// Entries with a guid match on guid only. Without one, title text,
    /// primary link and publication date must all agree; this can confuse two
    /// distinct untitled posts published at the same instant.
    pub fn is_same_item(&self, other: &Entry) -> bool {
        match (self.guid(), other.guid()) {
            (Some(a), Some(b)) => a == b,
            (Some(_), None) | (None, Some(_)) => false,
            (None, None) => {
                self.title.text_or_empty() == other.title.text_or_empty()
                    && self.primary_link() == other.primary_link()
                    && self.published == other.published
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_blank_guid_is_cleared() {
        let mut entry = Entry::new();
        entry.set_guid("  ");
        assert_eq!(entry.guid(), None);
        entry.set_guid(" abc ");
        assert_eq!(entry.guid(), Some("abc"));
    }

    #[test]
    fn test_primary_link_prefers_alternate() {
        let mut entry = Entry::new();
        entry.add_link(LinkRelation::Related).uri = "http://example.com/related".into();
        assert_eq!(entry.primary_link(), Some("http://example.com/related"));

        entry.alternate_link_mut().uri = "http://example.com/a".into();
        assert_eq!(entry.primary_link(), Some("http://example.com/a"));
        // alternate_link_mut reuses the existing alternate link
        entry.alternate_link_mut().title = Some("A".into());
        assert_eq!(entry.links().len(), 2);
    }

    #[test]
    fn test_deleting_drops_content() {
        let mut entry = Entry::new();
        entry.content_mut().set_text("body");
        entry.set_status(ReadStatus::Deleted);
        assert!(entry.is_deleted());
        assert!(!entry.content().has_value());
    }

    #[test]
    fn test_same_item_without_guid_needs_title_link_and_date() {
        let date = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).single();
        let mut a = Entry::new();
        a.title_mut().set_text("Title");
        a.alternate_link_mut().uri = "http://example.com/1".into();
        a.set_published(date);

        let mut b = a.clone();
        assert!(a.is_same_item(&b));

        b.set_published(Utc.with_ymd_and_hms(2024, 1, 2, 12, 0, 0).single());
        assert!(!a.is_same_item(&b));

        let mut c = a.clone();
        c.set_guid("g");
        assert!(!a.is_same_item(&c));
    }
}
