//! XML layout of the store directory.
//!
//! `feeds.xml` holds the global settings, the space factor and one `<stub>`
//! per known feed. Each feed's entries live in their own `feed_<id>.xml`.
//! Booleans are written as `yes`/`no` and timestamps as RFC 3339. Payloads
//! are CDATA-wrapped text, or base64 with `encoding="base64"` when binary.

use base64::Engine as _;
use chrono::{DateTime, SecondsFormat, Utc};
use quick_xml::encoding::Decoder;
use quick_xml::events::{BytesCData, BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use std::str::FromStr;
use url::Url;

use super::quota;
use super::stub::Stub;
use super::types::{GlobalSettings, StoreError};
use crate::model::{
    Content, Entry, EntryId, Feed, FeedId, FeedOverrides, HttpValidators, Link, LinkRelation,
    Person, ReadStatus,
};
use crate::status::LoadStatus;

const FORMAT_VERSION: &str = "1";

// ============================================================================
// Encoding
// ============================================================================

struct Encoder {
    writer: Writer<Vec<u8>>,
}

impl Encoder {
    fn new() -> Self {
        Self {
            writer: Writer::new(Vec::new()),
        }
    }

    fn event(&mut self, event: Event<'_>) -> Result<(), StoreError> {
        self.writer
            .write_event(event)
            .map_err(|e| StoreError::Encode(e.to_string()))
    }

    fn declaration(&mut self) -> Result<(), StoreError> {
        self.event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
    }

    fn end(&mut self, name: &str) -> Result<(), StoreError> {
        self.event(Event::End(BytesEnd::new(name)))
    }

    fn text(&mut self, value: &str) -> Result<(), StoreError> {
        if value.is_empty() {
            Ok(())
        } else if value.contains("]]>") {
            self.event(Event::Text(BytesText::new(value)))
        } else {
            self.event(Event::CData(BytesCData::new(value)))
        }
    }

    /// Appends already-encoded markup.
    fn raw(&mut self, bytes: &[u8]) {
        self.writer.get_mut().extend_from_slice(bytes);
    }

    fn content(&mut self, name: &str, content: &Content) -> Result<(), StoreError> {
        if !content.has_value() && !content.has_type() {
            return Ok(());
        }
        let mut tag = BytesStart::new(name);
        if content.has_type() {
            tag.push_attribute(("type", content.mime_type()));
        }
        if let Some(base) = content.base_uri() {
            tag.push_attribute(("base", base.as_str()));
        }
        if content.is_binary() {
            tag.push_attribute(("encoding", "base64"));
        }
        if !content.has_value() {
            return self.event(Event::Empty(tag));
        }

        self.event(Event::Start(tag))?;
        if content.is_binary() {
            let encoded = base64::engine::general_purpose::STANDARD.encode(content.as_bytes());
            self.event(Event::Text(BytesText::new(&encoded)))?;
        } else {
            self.text(content.text_or_empty())?;
        }
        self.end(name)
    }

    fn link(&mut self, link: &Link) -> Result<(), StoreError> {
        if !link.has_uri() {
            return Ok(());
        }
        let mut tag = BytesStart::new("link");
        tag.push_attribute(("rel", link.relation.as_str()));
        tag.push_attribute(("href", link.uri.as_str()));
        if let Some(title) = &link.title {
            tag.push_attribute(("title", title.as_str()));
        }
        if let Some(mime_type) = &link.mime_type {
            tag.push_attribute(("type", mime_type.as_str()));
        }
        if let Some(length) = link.length {
            tag.push_attribute(("length", length.to_string().as_str()));
        }
        self.event(Event::Empty(tag))
    }

    fn person(&mut self, person: &Person) -> Result<(), StoreError> {
        if person.is_empty() {
            return Ok(());
        }
        let mut tag = BytesStart::new("author");
        if let Some(name) = person.name.as_deref().filter(|n| !n.is_empty()) {
            tag.push_attribute(("name", name));
        }
        if let Some(email) = person.email.as_deref().filter(|e| !e.is_empty()) {
            tag.push_attribute(("email", email));
        }
        self.event(Event::Empty(tag))
    }

    fn overrides(&mut self, overrides: &FeedOverrides) -> Result<(), StoreError> {
        if *overrides == FeedOverrides::default() {
            return Ok(());
        }
        let mut tag = BytesStart::new("overrides");
        let numbers = [
            ("max-age", overrides.max_age_minutes),
            ("max-entries", overrides.max_entries),
            ("update-interval", overrides.update_interval_minutes),
            ("min-update-interval", overrides.min_update_interval_minutes),
        ];
        for (key, value) in numbers {
            if let Some(value) = value {
                tag.push_attribute((key, value.to_string().as_str()));
            }
        }
        let flags = [
            ("show-images", overrides.show_images),
            ("show-permalink", overrides.show_permalink),
            ("prefetch", overrides.prefetch_linked_article),
        ];
        for (key, value) in flags {
            if let Some(value) = value {
                tag.push_attribute((key, yes_no(value)));
            }
        }
        self.event(Event::Empty(tag))
    }

    fn into_bytes(self) -> Vec<u8> {
        self.writer.into_inner()
    }
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}

fn timestamp(when: DateTime<Utc>) -> String {
    when.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// A serialized feed document and what had to be left out of it.
#[derive(Debug)]
pub(crate) struct EncodedFeed {
    pub bytes: Vec<u8>,
    /// Entries that did not fit the budget and must be deleted.
    pub dropped: Vec<EntryId>,
    pub space_limited: bool,
}

/// Serializes `feed`, keeping the entry section within `budget` bytes.
pub(crate) fn encode_feed(feed: &Feed, budget: Option<u64>) -> Result<EncodedFeed, StoreError> {
    let mut encoded_entries = Vec::with_capacity(feed.entries().len());
    for entry in feed.entries() {
        encoded_entries.push(encode_entry(entry)?);
    }
    let sizes: Vec<(bool, usize)> = feed
        .entries()
        .iter()
        .zip(&encoded_entries)
        .map(|(entry, bytes)| (entry.keep(), bytes.len()))
        .collect();
    let selection = quota::select_entries(&sizes, budget);

    let mut out = Encoder::new();
    out.declaration()?;
    let mut root = BytesStart::new("feed");
    root.push_attribute(("version", FORMAT_VERSION));
    root.push_attribute(("id", feed.id().to_string().as_str()));
    root.push_attribute(("url", feed.url()));
    root.push_attribute(("status", feed.status().as_str()));
    root.push_attribute(("space-limited", yes_no(selection.space_limited)));
    root.push_attribute(("next-entry", feed.next_entry_id().to_string().as_str()));
    if let Some(updated) = feed.last_updated() {
        root.push_attribute(("last-updated", timestamp(updated).as_str()));
    }
    out.event(Event::Start(root))?;

    out.content("title", feed.title())?;
    out.content("tagline", feed.tagline())?;
    out.link(feed.link())?;
    out.person(feed.author())?;
    if let Some(icon) = feed.icon() {
        let mut tag = BytesStart::new("icon");
        tag.push_attribute(("href", icon));
        out.event(Event::Empty(tag))?;
    }
    out.overrides(feed.overrides())?;
    let validators = feed.validators();
    if !validators.is_empty() {
        let mut tag = BytesStart::new("validators");
        if let Some(etag) = &validators.etag {
            tag.push_attribute(("etag", etag.as_str()));
        }
        if let Some(last_modified) = &validators.last_modified {
            tag.push_attribute(("last-modified", last_modified.as_str()));
        }
        out.event(Event::Empty(tag))?;
    }

    for &index in &selection.written {
        out.raw(&encoded_entries[index]);
    }
    out.end("feed")?;

    let dropped = selection
        .dropped
        .iter()
        .map(|&index| feed.entries()[index].id())
        .collect();
    Ok(EncodedFeed {
        bytes: out.into_bytes(),
        dropped,
        space_limited: selection.space_limited,
    })
}

fn encode_entry(entry: &Entry) -> Result<Vec<u8>, StoreError> {
    let mut out = Encoder::new();
    let mut tag = BytesStart::new("entry");
    tag.push_attribute(("id", entry.id().to_string().as_str()));
    if let Some(guid) = entry.guid() {
        tag.push_attribute(("guid", guid));
    }
    tag.push_attribute(("status", entry.status().as_str()));
    tag.push_attribute(("keep", yes_no(entry.keep())));
    if let Some(published) = entry.published() {
        tag.push_attribute(("published", timestamp(published).as_str()));
    }
    out.event(Event::Start(tag))?;

    out.content("title", entry.title())?;
    out.content("content", entry.content())?;
    for link in entry.links() {
        out.link(link)?;
    }
    out.person(entry.author())?;
    for (name, value) in entry.properties() {
        let mut property = BytesStart::new("property");
        property.push_attribute(("name", name.as_str()));
        out.event(Event::Start(property))?;
        out.text(value)?;
        out.end("property")?;
    }
    out.end("entry")?;
    Ok(out.into_bytes())
}

/// Serializes the top-level store document.
pub(crate) fn encode_store<'a>(
    settings: &GlobalSettings,
    space_factor: f64,
    next_feed_id: u32,
    stubs: impl IntoIterator<Item = &'a Stub>,
) -> Result<Vec<u8>, StoreError> {
    let mut out = Encoder::new();
    out.declaration()?;
    let mut root = BytesStart::new("store");
    root.push_attribute(("version", FORMAT_VERSION));
    root.push_attribute(("next-feed-id", next_feed_id.to_string().as_str()));
    root.push_attribute(("space-factor", space_factor.to_string().as_str()));
    out.event(Event::Start(root))?;

    let mut tag = BytesStart::new("settings");
    tag.push_attribute(("max-size-kb", settings.max_size_kb.to_string().as_str()));
    tag.push_attribute(("max-age", settings.max_age_minutes.to_string().as_str()));
    tag.push_attribute(("max-entries", settings.max_entries.to_string().as_str()));
    tag.push_attribute(("update-interval", settings.update_interval_minutes.to_string().as_str()));
    tag.push_attribute((
        "min-update-interval",
        settings.min_update_interval_minutes.to_string().as_str(),
    ));
    tag.push_attribute(("show-images", yes_no(settings.show_images)));
    out.event(Event::Empty(tag))?;

    for stub in stubs {
        let mut tag = BytesStart::new("stub");
        tag.push_attribute(("id", stub.id.to_string().as_str()));
        tag.push_attribute(("url", stub.url.as_str()));
        if !stub.title.is_empty() {
            tag.push_attribute(("title", stub.title.as_str()));
        }
        tag.push_attribute(("total", stub.total_count.to_string().as_str()));
        tag.push_attribute(("unread", stub.unread_count.to_string().as_str()));
        if let Some(updated) = stub.last_updated {
            tag.push_attribute(("last-updated", timestamp(updated).as_str()));
        }
        if let Some(icon) = &stub.icon_file {
            tag.push_attribute(("icon", icon.as_str()));
        }
        tag.push_attribute(("subscribed", yes_no(stub.subscribed)));
        tag.push_attribute(("status", stub.status.as_str()));
        tag.push_attribute(("space-limited", yes_no(stub.space_limited)));
        tag.push_attribute(("disk-size", stub.disk_size.to_string().as_str()));

        if stub.overrides == FeedOverrides::default() {
            out.event(Event::Empty(tag))?;
        } else {
            out.event(Event::Start(tag))?;
            out.overrides(&stub.overrides)?;
            out.end("stub")?;
        }
    }

    out.end("store")?;
    Ok(out.into_bytes())
}

// ============================================================================
// Decoding
// ============================================================================

/// Attribute values of one element, decoded and unescaped.
struct Attrs(Vec<(String, String)>);

impl Attrs {
    fn read(e: &BytesStart<'_>, decoder: Decoder) -> Self {
        let mut values = Vec::new();
        for attr in e.attributes() {
            let attr = match attr {
                Ok(attr) => attr,
                Err(err) => {
                    tracing::warn!(error = %err, "Skipping malformed attribute in store document");
                    continue;
                }
            };
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            match attr.decode_and_unescape_value(decoder) {
                Ok(value) => values.push((key, value.into_owned())),
                Err(err) => {
                    tracing::warn!(attribute = %key, error = %err, "Skipping undecodable attribute");
                }
            }
        }
        Self(values)
    }

    fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn number<T: FromStr>(&self, key: &str) -> Option<T> {
        self.get(key).and_then(|v| v.trim().parse().ok())
    }

    fn flag(&self, key: &str) -> Option<bool> {
        match self.get(key)? {
            "yes" => Some(true),
            "no" => Some(false),
            _ => None,
        }
    }

    fn date(&self, key: &str) -> Option<DateTime<Utc>> {
        self.get(key).and_then(crate::feed::parse_rfc3339)
    }

    fn overrides(&self) -> FeedOverrides {
        FeedOverrides {
            max_age_minutes: self.number("max-age"),
            max_entries: self.number("max-entries"),
            update_interval_minutes: self.number("update-interval"),
            min_update_interval_minutes: self.number("min-update-interval"),
            show_images: self.flag("show-images"),
            show_permalink: self.flag("show-permalink"),
            prefetch_linked_article: self.flag("prefetch"),
        }
    }

    fn link(&self) -> Link {
        Link {
            relation: self
                .get("rel")
                .and_then(LinkRelation::parse)
                .unwrap_or_default(),
            uri: self.get("href").unwrap_or_default().to_string(),
            title: self.get("title").map(str::to_string),
            mime_type: self.get("type").map(str::to_string),
            length: self.number("length"),
        }
    }

    fn person(&self) -> Person {
        Person {
            name: self.get("name").map(str::to_string),
            email: self.get("email").map(str::to_string),
        }
    }
}

enum Slot {
    FeedTitle,
    FeedTagline,
    EntryTitle,
    EntryContent,
    Property(String),
}

/// A value element whose text is still being collected.
struct Pending {
    slot: Slot,
    content: Content,
    base64: bool,
    text: String,
}

fn open_document(bytes: &[u8]) -> Result<Reader<&[u8]>, StoreError> {
    let text = std::str::from_utf8(bytes).map_err(|e| StoreError::Malformed(e.to_string()))?;
    Ok(Reader::from_str(text))
}

/// Rebuilds the feed stored in a `feed_<id>.xml` document.
pub(crate) fn decode_feed(bytes: &[u8], id: FeedId) -> Result<Feed, StoreError> {
    let mut reader = open_document(bytes)?;
    let mut feed: Option<Feed> = None;
    let mut entry: Option<(Entry, ReadStatus)> = None;
    let mut pending: Option<Pending> = None;
    let mut closed = false;

    loop {
        let (tag, is_empty) = match reader.read_event()? {
            Event::Start(tag) => (tag, false),
            Event::Empty(tag) => (tag, true),
            Event::Text(text) => {
                if let Some(pending) = pending.as_mut() {
                    pending.text.push_str(&text.unescape()?);
                }
                continue;
            }
            Event::CData(data) => {
                if let Some(pending) = pending.as_mut() {
                    pending.text.push_str(&String::from_utf8_lossy(&data));
                }
                continue;
            }
            Event::End(tag) => {
                match tag.name().as_ref() {
                    b"feed" => closed = true,
                    b"entry" => {
                        if let (Some(feed), Some((mut done, status))) = (feed.as_mut(), entry.take()) {
                            done.set_status(status);
                            feed.restore_entry(done);
                        }
                    }
                    b"title" | b"tagline" | b"content" | b"property" => {
                        if let (Some(feed), Some(done)) = (feed.as_mut(), pending.take()) {
                            store_value(feed, entry.as_mut().map(|(e, _)| e), done, true)?;
                        }
                    }
                    _ => {}
                }
                continue;
            }
            Event::Eof => break,
            _ => continue,
        };

        let attrs = Attrs::read(&tag, reader.decoder());
        let name = tag.name();
        if name.as_ref() == b"feed" {
            let mut root = Feed::new(id, attrs.get("url").unwrap_or_default());
            root.set_status(
                attrs
                    .get("status")
                    .map(LoadStatus::from_str_lossy)
                    .unwrap_or_default(),
            );
            root.set_space_limited(attrs.flag("space-limited").unwrap_or(false));
            if let Some(next) = attrs.number("next-entry") {
                root.set_next_entry_id(next);
            }
            root.set_last_updated(attrs.date("last-updated"));
            feed = Some(root);
            continue;
        }

        let Some(feed) = feed.as_mut() else {
            return Err(StoreError::Malformed(format!(
                "<{}> outside of <feed>",
                String::from_utf8_lossy(name.as_ref())
            )));
        };
        let slot = match (name.as_ref(), entry.is_some()) {
            (b"entry", _) => {
                let mut item = Entry::new();
                item.set_id(EntryId(attrs.number("id").unwrap_or(0)));
                if let Some(guid) = attrs.get("guid") {
                    item.set_guid(guid);
                }
                item.set_keep(attrs.flag("keep").unwrap_or(false));
                item.set_published(attrs.date("published"));
                let status = attrs
                    .get("status")
                    .and_then(ReadStatus::parse)
                    .unwrap_or_default();
                entry = Some((item, status));
                None
            }
            (b"title", false) => Some(Slot::FeedTitle),
            (b"tagline", false) => Some(Slot::FeedTagline),
            (b"title", true) => Some(Slot::EntryTitle),
            (b"content", true) => Some(Slot::EntryContent),
            (b"property", true) => attrs.get("name").map(|n| Slot::Property(n.to_string())),
            (b"link", in_entry) => {
                let link = attrs.link();
                match entry.as_mut() {
                    Some((item, _)) if in_entry => item.push_link(link),
                    _ => *feed.link_mut() = link,
                }
                None
            }
            (b"author", in_entry) => {
                let person = attrs.person();
                match entry.as_mut() {
                    Some((item, _)) if in_entry => *item.author_mut() = person,
                    _ => *feed.author_mut() = person,
                }
                None
            }
            (b"icon", false) => {
                feed.set_icon(attrs.get("href").map(str::to_string));
                None
            }
            (b"overrides", false) => {
                *feed.overrides_mut() = attrs.overrides();
                None
            }
            (b"validators", false) => {
                feed.set_validators(HttpValidators {
                    etag: attrs.get("etag").map(str::to_string),
                    last_modified: attrs.get("last-modified").map(str::to_string),
                });
                None
            }
            _ => None,
        };

        if let Some(slot) = slot {
            let mut content = Content::new();
            if let Some(mime_type) = attrs.get("type") {
                content.set_type(mime_type);
            }
            content.set_base_uri(attrs.get("base").and_then(|b| Url::parse(b).ok()));
            let value = Pending {
                slot,
                content,
                base64: attrs.get("encoding") == Some("base64"),
                text: String::new(),
            };
            if is_empty {
                store_value(feed, entry.as_mut().map(|(e, _)| e), value, false)?;
            } else {
                pending = Some(value);
            }
        }
    }

    match feed {
        Some(feed) if closed => Ok(feed),
        Some(_) => Err(StoreError::Malformed("truncated feed document".to_string())),
        None => Err(StoreError::Malformed("missing <feed> root".to_string())),
    }
}

fn store_value(
    feed: &mut Feed,
    entry: Option<&mut Entry>,
    value: Pending,
    has_body: bool,
) -> Result<(), StoreError> {
    let Pending {
        slot,
        mut content,
        base64,
        text,
    } = value;
    if has_body {
        if base64 {
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(text.trim())
                .map_err(|e| StoreError::Malformed(format!("bad base64 payload: {e}")))?;
            content.set_binary(bytes);
        } else {
            content.set_text(text.as_str());
        }
    }

    match (slot, entry) {
        (Slot::FeedTitle, _) => *feed.title_mut() = content,
        (Slot::FeedTagline, _) => *feed.tagline_mut() = content,
        (Slot::EntryTitle, Some(entry)) => *entry.title_mut() = content,
        (Slot::EntryContent, Some(entry)) => *entry.content_mut() = content,
        (Slot::Property(name), Some(entry)) => entry.set_property(name, text),
        _ => {}
    }
    Ok(())
}

/// Contents of `feeds.xml`.
#[derive(Debug)]
pub(crate) struct StoreDocument {
    /// `None` when the document predates persisted settings.
    pub settings: Option<GlobalSettings>,
    pub space_factor: f64,
    pub next_feed_id: u32,
    pub stubs: Vec<Stub>,
}

pub(crate) fn decode_store(bytes: &[u8]) -> Result<StoreDocument, StoreError> {
    let mut reader = open_document(bytes)?;
    let mut document: Option<StoreDocument> = None;
    let mut current: Option<Stub> = None;
    let mut closed = false;

    loop {
        let (tag, is_empty) = match reader.read_event()? {
            Event::Start(tag) => (tag, false),
            Event::Empty(tag) => (tag, true),
            Event::End(tag) => {
                match tag.name().as_ref() {
                    b"store" => closed = true,
                    b"stub" => {
                        if let (Some(doc), Some(stub)) = (document.as_mut(), current.take()) {
                            doc.stubs.push(stub);
                        }
                    }
                    _ => {}
                }
                continue;
            }
            Event::Eof => break,
            _ => continue,
        };

        let attrs = Attrs::read(&tag, reader.decoder());
        match tag.name().as_ref() {
            b"store" => {
                document = Some(StoreDocument {
                    settings: None,
                    space_factor: attrs
                        .number::<f64>("space-factor")
                        .filter(|f| f.is_finite())
                        .map(|f| f.clamp(quota::MIN_SPACE_FACTOR, quota::MAX_SPACE_FACTOR))
                        .unwrap_or(1.0),
                    next_feed_id: attrs.number("next-feed-id").unwrap_or(1),
                    stubs: Vec::new(),
                });
            }
            b"settings" => {
                let Some(doc) = document.as_mut() else { continue };
                let defaults = GlobalSettings::default();
                doc.settings = Some(GlobalSettings {
                    max_size_kb: attrs.number("max-size-kb").unwrap_or(defaults.max_size_kb),
                    max_age_minutes: attrs.number("max-age").unwrap_or(defaults.max_age_minutes),
                    max_entries: attrs.number("max-entries").unwrap_or(defaults.max_entries),
                    update_interval_minutes: attrs
                        .number("update-interval")
                        .unwrap_or(defaults.update_interval_minutes),
                    min_update_interval_minutes: attrs
                        .number("min-update-interval")
                        .unwrap_or(defaults.min_update_interval_minutes),
                    show_images: attrs.flag("show-images").unwrap_or(defaults.show_images),
                });
            }
            b"stub" => {
                let (Some(id), Some(url)) = (attrs.number::<u32>("id"), attrs.get("url")) else {
                    tracing::warn!("Skipping stub without id or url");
                    continue;
                };
                let mut stub = Stub::new(FeedId(id), url);
                stub.title = attrs.get("title").unwrap_or_default().to_string();
                stub.total_count = attrs.number("total").unwrap_or(0);
                stub.unread_count = attrs.number("unread").unwrap_or(0);
                stub.last_updated = attrs.date("last-updated");
                stub.icon_file = attrs.get("icon").map(str::to_string);
                stub.subscribed = attrs.flag("subscribed").unwrap_or(true);
                stub.status = attrs
                    .get("status")
                    .map(LoadStatus::from_str_lossy)
                    .unwrap_or_default();
                stub.space_limited = attrs.flag("space-limited").unwrap_or(false);
                stub.disk_size = attrs.number("disk-size").unwrap_or(0);
                if is_empty {
                    if let Some(doc) = document.as_mut() {
                        doc.stubs.push(stub);
                    }
                } else {
                    current = Some(stub);
                }
            }
            b"overrides" => {
                if let Some(stub) = current.as_mut() {
                    stub.overrides = attrs.overrides();
                }
            }
            _ => {}
        }
    }

    let mut document = match document {
        Some(document) if closed => document,
        Some(_) => return Err(StoreError::Malformed("truncated store document".to_string())),
        None => return Err(StoreError::Malformed("missing <store> root".to_string())),
    };
    // ids are never reused, even after a hand-edited counter
    let highest = document.stubs.iter().map(|s| s.id.0).max().unwrap_or(0);
    document.next_feed_id = document.next_feed_id.max(highest.saturating_add(1));
    Ok(document)
}
