//! Tokenizer binding and event dispatch.
//!
//! [`FeedParser`] accepts a document in arbitrarily split chunks, keeps the
//! open-element, namespace and base-URI stacks, and hands stable element
//! names to the current [`ParseState`].
use std::borrow::Cow;

use futures::StreamExt;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use thiserror::Error;
use url::Url;

use super::names::{Name, NamespaceTable};
use super::state::{FeedFormat, ParseState};
use crate::loader::{Transport, TransportRequest, TransportResponse};
use crate::model::{AddOutcome, Entry, EntryId, Feed, FeedHandle, FeedId};
use crate::status::LoadStatus;
use crate::util::{escape_attribute, escape_markup, resolve, resolve_lossy};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ParseError {
    /// The parser failed earlier and accepts no more input.
    #[error("Parser is in a failed state")]
    Failed,

    /// The final chunk was already delivered.
    #[error("Parser has already finished")]
    Finished,

    /// The document element is neither RSS, RDF nor Atom.
    #[error("Not a feed: unrecognized root element <{0}>")]
    UnrecognizedRoot(String),

    /// The document ended without any element.
    #[error("Document contains no feed")]
    NoFeed,

    #[error("XML syntax error at byte {position}: {message}")]
    Syntax { position: u64, message: String },

    /// Input buffer could not grow.
    #[error("Out of memory while buffering feed data")]
    OutOfMemory,
}

impl ParseError {
    /// Load status a failed parse is reported with.
    pub fn status(&self) -> LoadStatus {
        match self {
            ParseError::OutOfMemory => LoadStatus::OutOfMemory,
            _ => LoadStatus::ParsingError,
        }
    }
}

// ============================================================================
// Observer
// ============================================================================

/// Lifecycle callbacks of one parse.
pub trait ParseObserver {
    /// First non-empty chunk arrived.
    fn data_received(&mut self) {}

    /// First start tag was seen.
    fn parsing_started(&mut self) {}

    /// An entry was added (`is_new`) or replaced a stored version.
    fn entry_loaded(&mut self, _feed: &FeedHandle, _entry: EntryId, _is_new: bool) {}

    /// Always called exactly once, with `Ok` or the failure status.
    fn parsing_done(&mut self, _status: LoadStatus) {}
}

impl ParseObserver for () {}

// ============================================================================
// Parse context
// ============================================================================

/// A start tag with its stable name and attributes.
#[derive(Debug)]
pub(crate) struct Element {
    pub name: Name,
    pub qname: String,
    attrs: Vec<(String, String)>,
}

impl Element {
    /// Unescaped attribute value, matched case-insensitively on the stable name.
    pub(crate) fn attr(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug)]
struct OpenElement {
    name: Name,
    base: Option<Url>,
}

#[derive(Debug)]
struct Retain {
    depth: usize,
    skip_first_child: bool,
    skipping: bool,
}

/// State shared by all parse states: target feed, open entry, text and stacks.
#[derive(Debug)]
pub(crate) struct ParseCx {
    feed: Option<FeedHandle>,
    feed_id: FeedId,
    document_uri: Option<Url>,
    entry: Option<Entry>,
    text: String,
    elements: Vec<OpenElement>,
    retain: Option<Retain>,
    loaded: Vec<(EntryId, bool)>,
}

impl ParseCx {
    fn new(document_uri: Option<Url>) -> Self {
        Self {
            feed: None,
            feed_id: FeedId::default(),
            document_uri,
            entry: None,
            text: String::new(),
            elements: Vec::new(),
            retain: None,
            loaded: Vec::new(),
        }
    }

    /// Text gathered since the current element started.
    pub(crate) fn take_text(&mut self) -> String {
        std::mem::take(&mut self.text)
    }

    /// Collects markup verbatim until the current element ends.
    pub(crate) fn keep_markup(&mut self, skip_first_child: bool) {
        self.retain = Some(Retain {
            depth: 0,
            skip_first_child,
            skipping: false,
        });
    }

    /// Nearest `xml:base` of an open element, else the document URI.
    pub(crate) fn current_base(&self) -> Option<Url> {
        self.elements
            .iter()
            .rev()
            .find_map(|e| e.base.clone())
            .or_else(|| self.document_uri.clone())
    }

    pub(crate) fn resolve_link(&self, raw: &str) -> String {
        resolve_lossy(self.current_base().as_ref(), raw)
    }

    /// Runs `f` on the target feed. `None` before a root was recognized.
    pub(crate) fn with_feed<R>(&self, f: impl FnOnce(&mut Feed) -> R) -> Option<R> {
        self.feed.as_ref().map(|handle| f(&mut handle.write()))
    }

    pub(crate) fn begin_entry(&mut self) {
        self.entry = Some(Entry::new());
    }

    pub(crate) fn entry_mut(&mut self) -> &mut Entry {
        self.entry.get_or_insert_with(Entry::new)
    }

    /// Adds the open entry to the feed and queues its notification.
    pub(crate) fn commit_entry(&mut self) {
        let Some(entry) = self.entry.take() else {
            return;
        };
        match self.with_feed(|feed| feed.add_entry(entry)) {
            Some(AddOutcome::Added(id)) => self.loaded.push((id, true)),
            Some(AddOutcome::Replaced(id)) => self.loaded.push((id, false)),
            Some(AddOutcome::Rejected) | None => {}
        }
    }

    fn ensure_feed(&mut self) {
        if self.feed.is_none() {
            let url = self.document_uri.as_ref().map(Url::as_str).unwrap_or("");
            self.feed = Some(FeedHandle::new(Feed::new(self.feed_id, url)));
        }
    }

    fn append_text(&mut self, text: &str) {
        if self.retain.is_some() {
            self.text.push_str(&escape_markup(text));
        } else {
            self.text.push_str(text);
        }
    }

    // Serializes a start tag inside retained markup.
    fn retain_start(&mut self, raw_name: &str, attrs: &[(String, String)], empty: bool) {
        let Some(retain) = self.retain.as_mut() else {
            return;
        };
        let skip = retain.depth == 0 && retain.skip_first_child;
        if skip {
            retain.skip_first_child = false;
        }
        if !empty {
            retain.depth += 1;
            retain.skipping |= skip;
        }
        if skip {
            return;
        }

        self.text.push('<');
        self.text.push_str(raw_name);
        for (key, value) in attrs {
            self.text.push(' ');
            self.text.push_str(key);
            self.text.push_str("=\"");
            self.text.push_str(&escape_attribute(value));
            self.text.push('"');
        }
        self.text.push_str(if empty { "/>" } else { ">" });
    }

    // Returns false when `raw_name` closes the element that armed retention.
    fn retain_end(&mut self, raw_name: &str) -> bool {
        let Some(retain) = self.retain.as_mut() else {
            return false;
        };
        if retain.depth == 0 {
            self.retain = None;
            return false;
        }
        retain.depth -= 1;
        if retain.depth == 0 && retain.skipping {
            retain.skipping = false;
            return true;
        }
        self.text.push_str("</");
        self.text.push_str(raw_name);
        self.text.push('>');
        true
    }
}

// ============================================================================
// Parser
// ============================================================================

/// Incremental RSS/Atom parser.
///
/// ```
/// use feedengine::feed::FeedParser;
///
/// let mut parser = FeedParser::new(None);
/// parser.feed_bytes(b"<rss version=\"2.0\"><channel><title>Ne", false).unwrap();
/// parser.feed_bytes(b"ws</title></channel></rss>", true).unwrap();
/// let feed = parser.finish().unwrap();
/// assert_eq!(feed.read().title().as_text(), Some("News"));
/// ```
#[derive(Debug)]
pub struct FeedParser<O = ()> {
    observer: O,
    cx: ParseCx,
    state: ParseState,
    namespaces: NamespaceTable,
    format: Option<FeedFormat>,
    pending: Vec<u8>,
    offset: u64,
    received_data: bool,
    started: bool,
    failed: bool,
    finished: bool,
    done_reported: bool,
}

impl FeedParser<()> {
    /// Parser without callbacks. `document_uri` is the base for relative links.
    pub fn new(document_uri: Option<Url>) -> Self {
        Self::with_observer(document_uri, ())
    }
}

impl<O: ParseObserver> FeedParser<O> {
    pub fn with_observer(document_uri: Option<Url>, observer: O) -> Self {
        Self {
            observer,
            cx: ParseCx::new(document_uri),
            state: ParseState::Initial,
            namespaces: NamespaceTable::default(),
            format: None,
            pending: Vec::new(),
            offset: 0,
            received_data: false,
            started: false,
            failed: false,
            finished: false,
            done_reported: false,
        }
    }

    /// Parses into an existing feed instead of creating one.
    pub fn reuse_feed(mut self, feed: FeedHandle) -> Self {
        self.cx.feed_id = feed.id();
        self.cx.feed = Some(feed);
        self
    }

    /// Id given to the feed created when the root element is recognized.
    pub fn assign_feed_id(mut self, id: FeedId) -> Self {
        self.cx.feed_id = id;
        self
    }

    pub fn feed(&self) -> Option<&FeedHandle> {
        self.cx.feed.as_ref()
    }

    /// Format of the document, once its root was recognized.
    pub fn format(&self) -> Option<FeedFormat> {
        self.format
    }

    /// True once a start tag was tokenized.
    pub fn has_started(&self) -> bool {
        self.started
    }

    pub fn is_failed(&self) -> bool {
        self.failed
    }

    pub fn observer(&self) -> &O {
        &self.observer
    }

    pub fn observer_mut(&mut self) -> &mut O {
        &mut self.observer
    }

    pub fn into_observer(self) -> O {
        self.observer
    }

    /// Retains raw markup until the end tag of the innermost open element.
    pub fn keep_markup(&mut self, skip_first_child: bool) {
        self.cx.keep_markup(skip_first_child);
    }

    pub fn current_base(&self) -> Option<Url> {
        self.cx.current_base()
    }

    /// Resolves a link against the current base; unresolvable text is kept as-is.
    pub fn resolve_link(&self, raw: &str) -> String {
        self.cx.resolve_link(raw)
    }

    /// Feeds the next chunk of the document.
    ///
    /// Chunks may split tokens anywhere; an incomplete trailing token is held
    /// back until more input arrives. `is_final` marks the end of the document.
    pub fn feed_bytes(&mut self, chunk: &[u8], is_final: bool) -> Result<(), ParseError> {
        if self.failed {
            return Err(ParseError::Failed);
        }
        if self.finished {
            return Err(ParseError::Finished);
        }
        if !chunk.is_empty() && !self.received_data {
            self.received_data = true;
            self.observer.data_received();
        }
        if self.pending.try_reserve(chunk.len()).is_err() {
            return Err(self.fail(ParseError::OutOfMemory));
        }
        self.pending.extend_from_slice(chunk);

        if let Err(e) = self.run(is_final) {
            return Err(self.fail(e));
        }
        if is_final {
            self.finished = true;
            // A reused feed is present before any root element is seen.
            if self.format.is_none() {
                return Err(self.fail(ParseError::NoFeed));
            }
            self.report_done(LoadStatus::Ok);
        }
        Ok(())
    }

    /// Delivers end of input if needed and returns the parsed feed.
    pub fn finish(&mut self) -> Result<FeedHandle, ParseError> {
        if self.failed {
            return Err(ParseError::Failed);
        }
        if !self.finished {
            self.feed_bytes(&[], true)?;
        }
        if self.format.is_none() {
            return Err(ParseError::NoFeed);
        }
        self.cx.feed.clone().ok_or(ParseError::NoFeed)
    }

    /// Fetches `request` through `transport` and parses the body as it streams in.
    ///
    /// A 304 reports `NotModified` without touching the feed. On success the
    /// response validators are stored on the feed, and a permanent redirect
    /// becomes the feed's new URL.
    pub async fn parse_from(&mut self, transport: &dyn Transport, request: TransportRequest) -> LoadStatus {
        let requested = request.url.clone();
        let response = match transport.load(request).await {
            Ok(response) => response,
            Err(e) => {
                tracing::debug!(url = %requested, error = %e, "Feed request failed");
                self.report_done(LoadStatus::LoadingError);
                return LoadStatus::LoadingError;
            }
        };
        if response.status == 304 {
            self.report_done(LoadStatus::NotModified);
            return LoadStatus::NotModified;
        }

        let TransportResponse {
            status,
            final_url,
            permanent_redirect,
            validators,
            mut body,
        } = response;
        self.cx.document_uri = Some(final_url);

        let mut outcome = LoadStatus::Ok;
        while let Some(chunk) = body.next().await {
            let result = match chunk {
                Ok(bytes) => self.feed_bytes(&bytes, false),
                Err(e) => {
                    tracing::debug!(url = %requested, error = %e, "Feed body interrupted");
                    outcome = LoadStatus::LoadingError;
                    break;
                }
            };
            if let Err(e) = result {
                outcome = e.status();
                break;
            }
        }
        if outcome == LoadStatus::Ok {
            if let Err(e) = self.finish() {
                outcome = e.status();
            }
        }

        // An error page is a loading failure, not a malformed feed.
        if !(200..300).contains(&status) && outcome == LoadStatus::ParsingError && self.format.is_none() {
            outcome = LoadStatus::LoadingError;
        }

        if outcome == LoadStatus::Ok {
            if let Some(feed) = &self.cx.feed {
                let mut feed = feed.write();
                if !validators.is_empty() {
                    feed.set_validators(validators);
                }
                if let Some(target) = permanent_redirect {
                    tracing::info!(from = %requested, to = %target, "Feed moved permanently");
                    feed.set_url(target.as_str());
                }
            }
        }
        self.report_done(outcome);
        outcome
    }

    fn fail(&mut self, error: ParseError) -> ParseError {
        self.failed = true;
        self.report_done(error.status());
        error
    }

    fn report_done(&mut self, status: LoadStatus) {
        if !self.done_reported {
            self.done_reported = true;
            self.observer.parsing_done(status);
        }
    }

    fn run(&mut self, is_final: bool) -> Result<(), ParseError> {
        let limit = if is_final {
            self.pending.len()
        } else {
            match self.pending.iter().rposition(|&b| b == b'>') {
                Some(index) => index + 1,
                None => return Ok(()),
            }
        };

        let mut buffer = std::mem::take(&mut self.pending);
        let consumed = self.tokenize(&buffer[..limit], is_final)?;
        buffer.drain(..consumed);
        self.pending = buffer;
        self.offset += consumed as u64;
        Ok(())
    }

    // Returns how many bytes were fully processed.
    fn tokenize(&mut self, input: &[u8], is_final: bool) -> Result<usize, ParseError> {
        let mut reader = Reader::from_reader(input);
        {
            let config = reader.config_mut();
            // each call starts mid-document; nesting is tracked here instead
            config.check_end_names = false;
            config.allow_unmatched_ends = true;
        }

        let mut consumed = 0;
        loop {
            match reader.read_event() {
                Ok(Event::Eof) => return Ok(input.len()),
                Ok(event) => {
                    self.dispatch(event)?;
                    consumed = usize::try_from(reader.buffer_position()).unwrap_or(input.len());
                }
                Err(e) if is_final => {
                    return Err(ParseError::Syntax {
                        position: self.offset + reader.error_position(),
                        message: e.to_string(),
                    })
                }
                // most likely a token cut by the chunk boundary
                Err(_) => return Ok(consumed),
            }
        }
    }

    fn dispatch(&mut self, event: Event<'_>) -> Result<(), ParseError> {
        match event {
            Event::Start(start) => self.start_element(&start, false)?,
            Event::Empty(start) => self.start_element(&start, true)?,
            Event::End(end) => self.end_element(&String::from_utf8_lossy(end.name().as_ref())),
            Event::Text(text) => {
                let raw = String::from_utf8_lossy(&text);
                self.cx.append_text(&unescape(&raw));
            }
            Event::CData(cdata) => {
                let raw = String::from_utf8_lossy(&cdata);
                self.cx.append_text(&raw);
            }
            _ => {}
        }
        Ok(())
    }

    fn start_element(&mut self, start: &BytesStart<'_>, empty: bool) -> Result<(), ParseError> {
        if !self.started {
            self.started = true;
            self.observer.parsing_started();
        }
        let raw_name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
        let raw_attrs = collect_attributes(start);

        if self.cx.retain.is_some() {
            self.cx.retain_start(&raw_name, &raw_attrs, empty);
            if !empty {
                self.namespaces.push_scope(&raw_attrs);
                self.cx.elements.push(OpenElement {
                    name: Name::Other,
                    base: None,
                });
            }
            return Ok(());
        }

        self.namespaces.push_scope(&raw_attrs);
        let qname = self.namespaces.qualify_element(&raw_name);
        let attrs = raw_attrs
            .iter()
            .filter(|(key, _)| key != "xmlns" && !key.starts_with("xmlns:"))
            .map(|(key, value)| (self.namespaces.qualify_attribute(key), value.clone()))
            .collect();
        let element = Element {
            name: Name::classify(&qname),
            qname,
            attrs,
        };

        let base = element
            .attr("xml:base")
            .and_then(|raw| resolve(self.cx.current_base().as_ref(), raw));
        self.cx.elements.push(OpenElement {
            name: element.name,
            base,
        });
        self.cx.text.clear();

        if self.state.is_initial() {
            let Some((state, format)) = ParseState::for_root(&element) else {
                return Err(ParseError::UnrecognizedRoot(element.qname));
            };
            tracing::debug!(format = %format, "Recognized feed document");
            self.format = Some(format);
            self.cx.ensure_feed();
            self.state = state;
        } else {
            let state = std::mem::take(&mut self.state);
            self.state = state.on_start(&mut self.cx, &element);
        }
        self.notify_loaded();

        if empty {
            self.end_element(&raw_name);
        }
        Ok(())
    }

    fn end_element(&mut self, raw_name: &str) {
        if self.cx.retain_end(raw_name) {
            self.cx.elements.pop();
            self.namespaces.pop_scope();
            return;
        }

        let Some(name) = self.cx.elements.last().map(|e| e.name) else {
            return;
        };
        let state = std::mem::take(&mut self.state);
        self.state = state.on_end(&mut self.cx, name);
        self.cx.elements.pop();
        self.namespaces.pop_scope();
        self.notify_loaded();
    }

    fn notify_loaded(&mut self) {
        if self.cx.loaded.is_empty() {
            return;
        }
        let Some(feed) = self.cx.feed.clone() else {
            return;
        };
        for (id, is_new) in std::mem::take(&mut self.cx.loaded) {
            self.observer.entry_loaded(&feed, id, is_new);
        }
    }
}

fn collect_attributes(start: &BytesStart<'_>) -> Vec<(String, String)> {
    start
        .attributes()
        .filter_map(|attr| match attr {
            Ok(attr) => {
                let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
                let raw = String::from_utf8_lossy(&attr.value);
                Some((key, unescape(&raw).into_owned()))
            }
            Err(e) => {
                tracing::warn!(error = %e, "Skipping malformed attribute");
                None
            }
        })
        .collect()
}

// Predefined XML entities plus the HTML ones feeds commonly leak.
// Text with anything else is kept verbatim.
fn unescape(raw: &str) -> Cow<'_, str> {
    quick_xml::escape::unescape_with(raw, |entity| {
        quick_xml::escape::resolve_predefined_entity(entity).or_else(|| html_entity(entity))
    })
    .unwrap_or(Cow::Borrowed(raw))
}

fn html_entity(name: &str) -> Option<&'static str> {
    Some(match name {
        "nbsp" => "\u{a0}",
        "copy" => "\u{a9}",
        "reg" => "\u{ae}",
        "trade" => "\u{2122}",
        "hellip" => "\u{2026}",
        "mdash" => "\u{2014}",
        "ndash" => "\u{2013}",
        "lsquo" => "\u{2018}",
        "rsquo" => "\u{2019}",
        "ldquo" => "\u{201c}",
        "rdquo" => "\u{201d}",
        "laquo" => "\u{ab}",
        "raquo" => "\u{bb}",
        "middot" => "\u{b7}",
        "euro" => "\u{20ac}",
        "eacute" => "\u{e9}",
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0">
  <channel>
    <title>Example</title>
    <link>http://example.com/</link>
    <item><guid>a</guid><title>First &amp; best</title><pubDate>Fri, 01 Mar 2024 08:00:00 GMT</pubDate></item>
    <item><guid>b</guid><title><![CDATA[Second <b>bold</b>]]></title></item>
  </channel>
</rss>"#;

    #[derive(Default)]
    struct Recorder {
        events: Vec<String>,
    }

    impl ParseObserver for Recorder {
        fn data_received(&mut self) {
            self.events.push("data".into());
        }
        fn parsing_started(&mut self) {
            self.events.push("started".into());
        }
        fn entry_loaded(&mut self, _feed: &FeedHandle, entry: EntryId, is_new: bool) {
            self.events.push(format!("entry {entry} {is_new}"));
        }
        fn parsing_done(&mut self, status: LoadStatus) {
            self.events.push(format!("done {}", status.as_str()));
        }
    }

    fn titles(feed: &FeedHandle) -> Vec<String> {
        feed.read()
            .entries()
            .iter()
            .map(|e| e.title().text_or_empty().to_string())
            .collect()
    }

    #[test]
    fn test_whole_document() {
        let mut parser = FeedParser::new(None);
        parser.feed_bytes(RSS.as_bytes(), true).unwrap();
        let feed = parser.finish().unwrap();
        assert_eq!(feed.read().title().as_text(), Some("Example"));
        assert_eq!(feed.read().link().uri, "http://example.com/");
        let mut got = titles(&feed);
        got.sort();
        assert_eq!(got, vec!["First & best", "Second <b>bold</b>"]);
    }

    #[test]
    fn test_every_split_point_gives_same_feed() {
        let bytes = RSS.as_bytes();
        let mut whole = FeedParser::new(None);
        whole.feed_bytes(bytes, true).unwrap();
        let expected = titles(&whole.finish().unwrap());

        for split in 1..bytes.len() {
            let mut parser = FeedParser::new(None);
            parser.feed_bytes(&bytes[..split], false).unwrap();
            parser.feed_bytes(&bytes[split..], true).unwrap();
            let feed = parser.finish().unwrap();
            assert_eq!(titles(&feed), expected, "split at {split}");
        }
    }

    #[test]
    fn test_byte_at_a_time() {
        let mut parser = FeedParser::new(None);
        for b in RSS.as_bytes() {
            parser.feed_bytes(std::slice::from_ref(b), false).unwrap();
        }
        let feed = parser.finish().unwrap();
        assert_eq!(feed.read().entries().len(), 2);
    }

    #[test]
    fn test_observer_sequence() {
        let mut parser = FeedParser::with_observer(None, Recorder::default());
        parser.feed_bytes(RSS.as_bytes(), true).unwrap();
        assert_eq!(
            parser.observer().events,
            vec!["data", "started", "entry 1 true", "entry 2 true", "done ok"]
        );
    }

    #[test]
    fn test_unrecognized_root_fails_immediately() {
        let mut parser = FeedParser::with_observer(None, Recorder::default());
        let err = parser
            .feed_bytes(b"<html><body>not a feed</body></html>", false)
            .unwrap_err();
        assert!(matches!(err, ParseError::UnrecognizedRoot(ref name) if name == "html"));
        assert!(parser.is_failed());
        assert!(matches!(parser.feed_bytes(b"<rss/>", true), Err(ParseError::Failed)));
        assert_eq!(parser.observer().events.last().map(String::as_str), Some("done parsing-error"));
    }

    #[test]
    fn test_empty_document_reports_done() {
        let mut parser = FeedParser::with_observer(None, Recorder::default());
        assert!(matches!(parser.feed_bytes(b"", true), Err(ParseError::NoFeed)));
        assert_eq!(parser.observer().events, vec!["done parsing-error"]);
    }

    #[test]
    fn test_rootless_document_on_reused_feed_is_not_ok() {
        for doc in [&b""[..], &b"<?xml version=\"1.0\"?>"[..]] {
            let feed = FeedHandle::new(Feed::new(FeedId(1), "http://example.com/rss"));
            let mut parser = FeedParser::with_observer(None, Recorder::default()).reuse_feed(feed);
            assert!(matches!(parser.feed_bytes(doc, true), Err(ParseError::NoFeed)));
            assert!(parser.is_failed());
            assert_eq!(parser.observer().events.last().map(String::as_str), Some("done parsing-error"));
        }
    }

    #[test]
    fn test_syntax_error_on_final_chunk() {
        let mut parser = FeedParser::new(None);
        parser.feed_bytes(b"<rss><channel><title>x</title", false).unwrap();
        let err = parser.feed_bytes(b"", true).unwrap_err();
        assert!(matches!(err, ParseError::Syntax { .. }));
    }

    #[test]
    fn test_xml_base_resolution() {
        let doc = r#"<feed xmlns="http://www.w3.org/2005/Atom" xml:base="http://example.org/blog/">
  <entry xml:base="2024/">
    <id>e1</id>
    <link href="post.html"/>
  </entry>
  <entry><id>e2</id><link href="/about"/></entry>
</feed>"#;
        let mut parser = FeedParser::new(Some(Url::parse("http://fallback.test/feed").unwrap()));
        parser.feed_bytes(doc.as_bytes(), true).unwrap();
        let feed = parser.finish().unwrap();
        let feed = feed.read();
        let links: Vec<_> = feed
            .entries()
            .iter()
            .map(|e| e.primary_link().unwrap_or_default().to_string())
            .collect();
        assert!(links.contains(&"http://example.org/blog/2024/post.html".to_string()));
        assert!(links.contains(&"http://example.org/about".to_string()));
    }

    #[test]
    fn test_entities_and_unknown_entities() {
        assert_eq!(unescape("a &amp; b &#169; &hellip;"), "a & b \u{a9} \u{2026}");
        assert_eq!(unescape("AT&T &bogus;"), "AT&T &bogus;");
    }

    #[test]
    fn test_public_keep_markup_and_resolution() {
        let mut parser = FeedParser::new(Some(Url::parse("http://example.com/dir/feed").unwrap()));
        assert_eq!(parser.resolve_link("item/1"), "http://example.com/dir/item/1");
        assert_eq!(
            parser.current_base().map(String::from),
            Some("http://example.com/dir/feed".to_string())
        );
        parser.keep_markup(false);
        assert!(parser.cx.retain.is_some());
    }
}
