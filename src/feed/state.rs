//! Parse states.
//!
//! Each variant owns the context of the grammar it belongs to. A transition
//! consumes the current state and returns the next one, so a context survives
//! moving between states of the same family and is dropped on completion.

use std::fmt;

use super::atom;
use super::driver::{Element, ParseCx};
use super::names::Name;
use super::rss;
use crate::model::{TEXT_HTML, TEXT_PLAIN};

/// RSS dialect, sniffed from the root element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RssVersion {
    V091,
    V092,
    V093,
    V094,
    /// RDF based RSS 1.0.
    V10,
    V20,
}

impl RssVersion {
    /// Version named by the `version` attribute of `<rss>`; 2.0 when absent or unknown.
    pub fn from_attribute(value: Option<&str>) -> Self {
        match value {
            Some("0.91") => RssVersion::V091,
            Some("0.92") => RssVersion::V092,
            Some("0.93") => RssVersion::V093,
            Some("0.94") => RssVersion::V094,
            _ => RssVersion::V20,
        }
    }

    /// 0.91 and 1.0 define plain text descriptions; the others allow HTML.
    pub fn default_content_type(self) -> &'static str {
        match self {
            RssVersion::V091 | RssVersion::V10 => TEXT_PLAIN,
            _ => TEXT_HTML,
        }
    }

    pub(crate) fn sniffs_html(self) -> bool {
        matches!(self, RssVersion::V091 | RssVersion::V10)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtomVersion {
    V03,
    V10,
}

impl AtomVersion {
    pub fn from_attribute(value: Option<&str>) -> Self {
        match value {
            Some("0.3") => AtomVersion::V03,
            _ => AtomVersion::V10,
        }
    }
}

/// Format and version of a recognized document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedFormat {
    Rss(RssVersion),
    Atom(AtomVersion),
}

impl fmt::Display for FeedFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FeedFormat::Rss(RssVersion::V091) => "RSS 0.91",
            FeedFormat::Rss(RssVersion::V092) => "RSS 0.92",
            FeedFormat::Rss(RssVersion::V093) => "RSS 0.93",
            FeedFormat::Rss(RssVersion::V094) => "RSS 0.94",
            FeedFormat::Rss(RssVersion::V10) => "RSS 1.0",
            FeedFormat::Rss(RssVersion::V20) => "RSS 2.0",
            FeedFormat::Atom(AtomVersion::V03) => "Atom 0.3",
            FeedFormat::Atom(AtomVersion::V10) => "Atom 1.0",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RssContext {
    pub version: RssVersion,
    /// Set when an `<item>` shows up after `</channel>`, as RSS 1.0 does.
    pub items_outside_channel: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct AtomContext {
    pub version: AtomVersion,
}

/// Whether an RSS `<guid>` doubles as the item link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum Permalink {
    #[default]
    No,
    /// A guid without `isPermaLink`.
    Maybe,
    Yes,
}

/// Per-item bookkeeping while an RSS item is open.
#[derive(Debug, Default)]
pub(crate) struct ItemScratch {
    pub permalink: Permalink,
    pub have_author: bool,
    pub have_xml_content: bool,
}

/// How the text of an Atom content construct is encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum ContentMode {
    /// Plain text, stored trimmed.
    Text,
    /// Markup escaped as text; the tokenizer already unescaped it.
    Escaped,
    /// Inline markup retained verbatim.
    Xml,
    Base64,
    /// A type we do not interpret; stored as-is.
    #[default]
    Unknown,
    /// `<content src="...">`, nothing to store.
    Ignored,
}

#[derive(Debug, Default)]
pub(crate) struct AtomScratch {
    pub content_mode: ContentMode,
    /// Inside an entry's `<source>`, whose metadata belongs to another feed.
    pub in_source: bool,
}

/// Whose `<author>` an Atom author state is filling in, and where to resume.
#[derive(Debug)]
pub(crate) enum AuthorOwner {
    Feed(AtomScratch),
    Entry(AtomScratch),
}

#[derive(Debug, Default)]
pub(crate) enum ParseState {
    #[default]
    Initial,
    RssRoot(RssContext),
    RssChannel(RssContext),
    RssItem(RssContext, ItemScratch),
    RssImage(RssContext),
    AtomRoot(AtomContext, AtomScratch),
    AtomAuthor(AtomContext, AuthorOwner),
    AtomEntry(AtomContext, AtomScratch),
    Done,
}

impl ParseState {
    /// State entered for a document root, or `None` when the root is not a feed.
    pub(crate) fn for_root(el: &Element) -> Option<(ParseState, FeedFormat)> {
        match el.name {
            Name::Rss => {
                let version = RssVersion::from_attribute(el.attr("version"));
                Some((rss_root(version), FeedFormat::Rss(version)))
            }
            Name::RdfRoot => Some((rss_root(RssVersion::V10), FeedFormat::Rss(RssVersion::V10))),
            Name::Feed => {
                let version = AtomVersion::from_attribute(el.attr("version"));
                let state = ParseState::AtomRoot(AtomContext { version }, AtomScratch::default());
                Some((state, FeedFormat::Atom(version)))
            }
            _ => None,
        }
    }

    pub(crate) fn on_start(self, cx: &mut ParseCx, el: &Element) -> ParseState {
        match self {
            ParseState::RssRoot(ctx) => rss::root_start(ctx, cx, el),
            ParseState::RssChannel(ctx) => rss::channel_start(ctx, cx, el),
            ParseState::RssItem(ctx, scratch) => rss::item_start(ctx, scratch, cx, el),
            ParseState::AtomRoot(ctx, scratch) => atom::root_start(ctx, scratch, cx, el),
            ParseState::AtomEntry(ctx, scratch) => atom::entry_start(ctx, scratch, cx, el),
            // image and author children only matter at their end tags
            other => other,
        }
    }

    pub(crate) fn on_end(self, cx: &mut ParseCx, name: Name) -> ParseState {
        match self {
            ParseState::RssRoot(ctx) => rss::root_end(ctx, name),
            ParseState::RssChannel(ctx) => rss::channel_end(ctx, cx, name),
            ParseState::RssItem(ctx, scratch) => rss::item_end(ctx, scratch, cx, name),
            ParseState::RssImage(ctx) => rss::image_end(ctx, cx, name),
            ParseState::AtomRoot(ctx, scratch) => atom::root_end(ctx, scratch, cx, name),
            ParseState::AtomAuthor(ctx, owner) => atom::author_end(ctx, owner, cx, name),
            ParseState::AtomEntry(ctx, scratch) => atom::entry_end(ctx, scratch, cx, name),
            other => other,
        }
    }

    pub(crate) fn is_initial(&self) -> bool {
        matches!(self, ParseState::Initial)
    }

    pub(crate) fn is_done(&self) -> bool {
        matches!(self, ParseState::Done)
    }
}

fn rss_root(version: RssVersion) -> ParseState {
    ParseState::RssRoot(RssContext {
        version,
        items_outside_channel: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rss_version_sniffing() {
        assert_eq!(RssVersion::from_attribute(Some("0.91")), RssVersion::V091);
        assert_eq!(RssVersion::from_attribute(Some("0.94")), RssVersion::V094);
        assert_eq!(RssVersion::from_attribute(Some("2.0")), RssVersion::V20);
        assert_eq!(RssVersion::from_attribute(Some("2.0.1")), RssVersion::V20);
        assert_eq!(RssVersion::from_attribute(Some("banana")), RssVersion::V20);
        assert_eq!(RssVersion::from_attribute(None), RssVersion::V20);
    }

    #[test]
    fn test_default_content_types() {
        assert_eq!(RssVersion::V091.default_content_type(), TEXT_PLAIN);
        assert_eq!(RssVersion::V10.default_content_type(), TEXT_PLAIN);
        assert_eq!(RssVersion::V092.default_content_type(), TEXT_HTML);
        assert_eq!(RssVersion::V20.default_content_type(), TEXT_HTML);
    }

    #[test]
    fn test_atom_version_sniffing() {
        assert_eq!(AtomVersion::from_attribute(Some("0.3")), AtomVersion::V03);
        assert_eq!(AtomVersion::from_attribute(Some("1.0")), AtomVersion::V10);
        assert_eq!(AtomVersion::from_attribute(None), AtomVersion::V10);
    }
}
