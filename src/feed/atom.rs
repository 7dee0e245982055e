//! Atom 0.3 and 1.0 grammar.
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use super::dates::parse_rfc3339;
use super::driver::{Element, ParseCx};
use super::names::Name;
use super::state::{AtomContext, AtomScratch, AtomVersion, AuthorOwner, ContentMode, ParseState};
use crate::model::{Content, Link, LinkRelation, Person, TEXT_HTML, TEXT_PLAIN, XHTML};
use crate::util::parse_author;

/// Content construct a text construct is read into.
#[derive(Debug, Clone, Copy)]
enum Target {
    FeedTitle,
    FeedSubtitle,
    EntryTitle,
    EntryContent,
}

fn with_target<R>(cx: &mut ParseCx, target: Target, f: impl FnOnce(&mut Content) -> R) -> Option<R> {
    match target {
        Target::FeedTitle => cx.with_feed(|feed| f(feed.title_mut())),
        Target::FeedSubtitle => cx.with_feed(|feed| f(feed.tagline_mut())),
        Target::EntryTitle => Some(f(cx.entry_mut().title_mut())),
        Target::EntryContent => Some(f(cx.entry_mut().content_mut())),
    }
}

// ===== Feed =====

pub(crate) fn root_start(
    ctx: AtomContext,
    mut scratch: AtomScratch,
    cx: &mut ParseCx,
    el: &Element,
) -> ParseState {
    match el.name {
        Name::Title => scratch.content_mode = prepare_construct(ctx, cx, el, Target::FeedTitle),
        Name::Subtitle => scratch.content_mode = prepare_construct(ctx, cx, el, Target::FeedSubtitle),
        Name::Link => {
            let rel = el.attr("rel").map(|r| r.trim().to_ascii_lowercase());
            // the last alternate or self link wins
            if matches!(rel.as_deref(), None | Some("alternate") | Some("self")) {
                let uri = el.attr("href").map(|raw| cx.resolve_link(raw)).unwrap_or_default();
                let title = el.attr("title").map(str::to_string);
                let mime_type = el.attr("type").map(str::to_string);
                cx.with_feed(|feed| {
                    let link = feed.link_mut();
                    link.uri = uri;
                    link.title = title;
                    link.mime_type = mime_type;
                });
            }
        }
        Name::Author => return ParseState::AtomAuthor(ctx, AuthorOwner::Feed(scratch)),
        Name::Entry => {
            cx.begin_entry();
            return ParseState::AtomEntry(ctx, AtomScratch::default());
        }
        _ => {}
    }
    ParseState::AtomRoot(ctx, scratch)
}

pub(crate) fn root_end(ctx: AtomContext, scratch: AtomScratch, cx: &mut ParseCx, name: Name) -> ParseState {
    match name {
        Name::Feed => return ParseState::Done,
        Name::Title => store_construct(cx, scratch.content_mode, Target::FeedTitle),
        Name::Subtitle => store_construct(cx, scratch.content_mode, Target::FeedSubtitle),
        Name::Icon => {
            let text = cx.take_text();
            if !text.trim().is_empty() {
                let uri = cx.resolve_link(&text);
                cx.with_feed(|feed| feed.set_icon(Some(uri)));
            }
        }
        _ => {}
    }
    ParseState::AtomRoot(ctx, scratch)
}

// ===== Author =====

pub(crate) fn author_end(ctx: AtomContext, owner: AuthorOwner, cx: &mut ParseCx, name: Name) -> ParseState {
    match name {
        Name::Author => {
            return match owner {
                AuthorOwner::Feed(scratch) => ParseState::AtomRoot(ctx, scratch),
                AuthorOwner::Entry(scratch) => ParseState::AtomEntry(ctx, scratch),
            }
        }
        Name::Name => {
            let text = cx.take_text();
            let name = text.trim().to_string();
            if !name.is_empty() {
                with_person(cx, &owner, |person| person.name = Some(name));
            }
        }
        Name::Email => {
            let text = cx.take_text();
            let email = match parse_author(&text) {
                (Some(email), _) => email,
                _ => text.trim().to_string(),
            };
            if !email.is_empty() {
                with_person(cx, &owner, |person| person.email = Some(email));
            }
        }
        _ => {}
    }
    ParseState::AtomAuthor(ctx, owner)
}

fn with_person(cx: &mut ParseCx, owner: &AuthorOwner, f: impl FnOnce(&mut Person)) {
    match owner {
        AuthorOwner::Feed(_) => {
            cx.with_feed(|feed| f(feed.author_mut()));
        }
        AuthorOwner::Entry(_) => f(cx.entry_mut().author_mut()),
    }
}

// ===== Entry =====

pub(crate) fn entry_start(
    ctx: AtomContext,
    mut scratch: AtomScratch,
    cx: &mut ParseCx,
    el: &Element,
) -> ParseState {
    if scratch.in_source {
        return ParseState::AtomEntry(ctx, scratch);
    }
    match el.name {
        Name::Title => scratch.content_mode = prepare_construct(ctx, cx, el, Target::EntryTitle),
        Name::Summary => {
            // summary only stands in for missing content
            if !cx.entry_mut().content().has_type() {
                scratch.content_mode = prepare_construct(ctx, cx, el, Target::EntryContent);
            }
        }
        Name::Content => scratch.content_mode = prepare_construct(ctx, cx, el, Target::EntryContent),
        Name::Link => {
            let relation = match el.attr("rel") {
                None => Some(LinkRelation::Alternate),
                Some(rel) => LinkRelation::parse(rel),
            };
            if let Some(relation) = relation {
                let link = Link {
                    relation,
                    uri: el.attr("href").map(|raw| cx.resolve_link(raw)).unwrap_or_default(),
                    title: el.attr("title").map(str::to_string),
                    mime_type: el.attr("type").map(str::to_string),
                    length: el.attr("length").and_then(|v| v.trim().parse().ok()),
                };
                cx.entry_mut().push_link(link);
            }
        }
        Name::Author => return ParseState::AtomAuthor(ctx, AuthorOwner::Entry(scratch)),
        Name::Source => scratch.in_source = true,
        Name::Category => {
            if let Some(term) = el.attr("term").map(str::trim).filter(|t| !t.is_empty()) {
                let entry = cx.entry_mut();
                let joined = match entry.property("category") {
                    Some(existing) => format!("{existing}, {term}"),
                    None => term.to_string(),
                };
                entry.set_property("category", joined);
            }
        }
        _ => {}
    }
    ParseState::AtomEntry(ctx, scratch)
}

pub(crate) fn entry_end(ctx: AtomContext, mut scratch: AtomScratch, cx: &mut ParseCx, name: Name) -> ParseState {
    if scratch.in_source {
        if name == Name::Source {
            scratch.in_source = false;
        }
        return ParseState::AtomEntry(ctx, scratch);
    }
    match name {
        Name::Entry => {
            cx.commit_entry();
            return ParseState::AtomRoot(ctx, AtomScratch::default());
        }
        Name::Title => store_construct(cx, scratch.content_mode, Target::EntryTitle),
        Name::Summary => {
            if !cx.entry_mut().content().has_value() {
                store_construct(cx, scratch.content_mode, Target::EntryContent);
            }
        }
        Name::Content => store_construct(cx, scratch.content_mode, Target::EntryContent),
        Name::Updated => {
            if let Some(date) = parse_rfc3339(&cx.take_text()) {
                cx.entry_mut().set_published(Some(date));
            }
        }
        Name::Published => {
            let date = parse_rfc3339(&cx.take_text());
            let entry = cx.entry_mut();
            if entry.published().is_none() {
                entry.set_published(date);
            }
        }
        Name::Id => {
            let text = cx.take_text();
            cx.entry_mut().set_guid(text);
        }
        _ => {}
    }
    ParseState::AtomEntry(ctx, scratch)
}

// ===== Content constructs =====

// Picks type and decoding mode from the `type` and `mode` attributes and
// prepares the target for the text that follows.
fn prepare_construct(ctx: AtomContext, cx: &mut ParseCx, el: &Element, target: Target) -> ContentMode {
    if el.name == Name::Content && el.attr("src").is_some() {
        return ContentMode::Ignored;
    }

    let declared = el.attr("type").map(str::trim).filter(|t| !t.is_empty());
    let (mime_type, mut mode) = match declared {
        None => (TEXT_PLAIN.to_string(), ContentMode::Text),
        Some(t) => {
            let lower = t.to_ascii_lowercase();
            match lower.as_str() {
                "text" | "text/plain" => (TEXT_PLAIN.to_string(), ContentMode::Text),
                "html" | "text/html" => (TEXT_HTML.to_string(), ContentMode::Escaped),
                "xhtml" => (XHTML.to_string(), ContentMode::Xml),
                l if l.starts_with("application/") && l.ends_with("xml") => {
                    (XHTML.to_string(), ContentMode::Xml)
                }
                _ => (t.to_string(), ContentMode::Unknown),
            }
        }
    };

    match el.attr("mode").map(|m| m.trim().to_ascii_lowercase()).as_deref() {
        Some("xml") => mode = ContentMode::Xml,
        Some("escaped") => mode = ContentMode::Escaped,
        Some("base64") => mode = ContentMode::Base64,
        // Atom 0.3 defaults to inline XML for content and escaped text otherwise
        _ if ctx.version == AtomVersion::V03 && (mode == ContentMode::Unknown || declared.is_none()) => {
            mode = if el.name == Name::Content {
                ContentMode::Xml
            } else {
                ContentMode::Escaped
            };
        }
        _ => {}
    }

    let base = cx.current_base();
    with_target(cx, target, |content| {
        content.set_type(&mime_type);
        content.set_base_uri(base);
    });
    if mode == ContentMode::Xml {
        cx.keep_markup(true);
    }
    mode
}

fn store_construct(cx: &mut ParseCx, mode: ContentMode, target: Target) {
    let text = cx.take_text();
    match mode {
        ContentMode::Xml | ContentMode::Escaped | ContentMode::Unknown => {
            with_target(cx, target, |content| content.set_text(text));
        }
        ContentMode::Text => {
            with_target(cx, target, |content| content.set_text(text.trim()));
        }
        ContentMode::Base64 => {
            let compact: String = text.chars().filter(|c| !c.is_ascii_whitespace()).collect();
            match STANDARD.decode(compact) {
                Ok(bytes) => {
                    with_target(cx, target, |content| content.set_binary(bytes));
                }
                Err(e) => tracing::warn!(error = %e, "Discarding undecodable base64 content"),
            }
        }
        ContentMode::Ignored => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::FeedParser;
    use crate::model::{ContentData, Entry, FeedHandle};
    use pretty_assertions::assert_eq;

    fn parse(doc: &str) -> FeedHandle {
        let mut parser = FeedParser::new(url::Url::parse("http://example.org/atom.xml").ok());
        parser.feed_bytes(doc.as_bytes(), true).unwrap();
        parser.finish().unwrap()
    }

    fn entry(feed: &FeedHandle, guid: &str) -> Entry {
        feed.read()
            .entries()
            .iter()
            .find(|e| e.guid() == Some(guid))
            .cloned()
            .unwrap()
    }

    const ATOM10: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title type="text">  Example Feed  </title>
  <subtitle type="html">&lt;em&gt;All&lt;/em&gt; the news</subtitle>
  <link rel="self" href="http://example.org/atom.xml"/>
  <link href="http://example.org/"/>
  <icon>/favicon.ico</icon>
  <author><name> John Doe </name><email>john@example.org</email></author>
  <entry>
    <title>Atom-Powered Robots Run Amok</title>
    <link href="http://example.org/2003/12/13/atom03"/>
    <link rel="enclosure" href="/a.mp3" type="audio/mpeg" length="42"/>
    <link rel="license" href="/license"/>
    <id>urn:uuid:1225c695</id>
    <updated>2003-12-13T18:30:02Z</updated>
    <published>2003-12-01T00:00:00Z</published>
    <summary>Some text.</summary>
    <content type="xhtml"><div xmlns="http://www.w3.org/1999/xhtml"><p>Hello <em>world</em></p></div></content>
    <category term="robots"/>
  </entry>
  <entry>
    <title type="html">A &amp;lt;b&amp;gt; title</title>
    <id>urn:2</id>
    <published>2003-12-01T00:00:00Z</published>
    <summary type="html">&lt;p&gt;Only a summary&lt;/p&gt;</summary>
    <author><name>Jane</name></author>
    <source><title>Other feed</title><id>urn:other</id><author><name>Nobody</name></author></source>
  </entry>
</feed>"#;

    #[test]
    fn test_feed_metadata() {
        let feed = parse(ATOM10);
        let feed = feed.read();
        assert_eq!(feed.title().as_text(), Some("Example Feed"));
        assert_eq!(feed.title().mime_type(), TEXT_PLAIN);
        assert_eq!(feed.tagline().as_text(), Some("<em>All</em> the news"));
        assert_eq!(feed.tagline().mime_type(), TEXT_HTML);
        assert_eq!(feed.link().uri, "http://example.org/");
        assert_eq!(feed.icon(), Some("http://example.org/favicon.ico"));
        assert_eq!(feed.author().name.as_deref(), Some("John Doe"));
        assert_eq!(feed.author().email.as_deref(), Some("john@example.org"));
    }

    #[test]
    fn test_xhtml_content_drops_wrapper_div() {
        let feed = parse(ATOM10);
        let first = entry(&feed, "urn:uuid:1225c695");
        assert_eq!(first.content().mime_type(), XHTML);
        assert_eq!(first.content().as_text(), Some("<p>Hello <em>world</em></p>"));
        assert_eq!(first.primary_link(), Some("http://example.org/2003/12/13/atom03"));
        assert_eq!(first.links().len(), 2);
        let enclosure = first.enclosures().next().unwrap();
        assert_eq!(enclosure.uri, "http://example.org/a.mp3");
        assert_eq!(enclosure.length, Some(42));
        assert_eq!(first.property("category"), Some("robots"));
        assert_eq!(
            first.published().map(|d| d.to_rfc3339()),
            Some("2003-12-13T18:30:02+00:00".to_string())
        );
    }

    #[test]
    fn test_summary_fills_missing_content_and_source_is_skipped() {
        let feed = parse(ATOM10);
        let second = entry(&feed, "urn:2");
        assert_eq!(second.title().as_text(), Some("A &lt;b&gt; title"));
        assert_eq!(second.content().mime_type(), TEXT_HTML);
        assert_eq!(second.content().as_text(), Some("<p>Only a summary</p>"));
        assert_eq!(second.author().name.as_deref(), Some("Jane"));
        assert!(second.published().is_some());
    }

    #[test]
    fn test_content_with_src_is_ignored() {
        let feed = parse(
            r#"<feed xmlns="http://www.w3.org/2005/Atom"><entry><id>x</id>
                <content src="http://example.org/body.html" type="text/html"/>
                <summary>Fallback</summary></entry></feed>"#,
        );
        let e = entry(&feed, "x");
        assert_eq!(e.content().as_text(), Some("Fallback"));
        assert_eq!(e.content().mime_type(), TEXT_PLAIN);
    }

    #[test]
    fn test_mode_attribute_ignores_case() {
        let feed = parse(
            r#"<feed xmlns="http://www.w3.org/2005/Atom"><entry><id>m</id>
                <content type="image/png" mode="Base64">iVBORw==</content></entry></feed>"#,
        );
        let e = entry(&feed, "m");
        assert_eq!(e.content().data(), &ContentData::Binary(vec![0x89, b'P', b'N', b'G'].into()));
    }

    #[test]
    fn test_self_link_after_alternate_replaces_it() {
        let feed = parse(
            r#"<feed xmlns="http://www.w3.org/2005/Atom">
                <link rel="alternate" href="http://example.org/"/>
                <link rel="SELF" href="/atom.xml" type="application/atom+xml"/>
                <link rel="related" href="http://example.com/other"/>
            </feed>"#,
        );
        let feed = feed.read();
        assert_eq!(feed.link().uri, "http://example.org/atom.xml");
        assert_eq!(feed.link().mime_type.as_deref(), Some("application/atom+xml"));
    }

    #[test]
    fn test_base64_content() {
        let feed = parse(
            r#"<feed xmlns="http://www.w3.org/2005/Atom"><entry><id>b</id>
                <content type="image/png" mode="base64">iVBO
                Rw==</content></entry></feed>"#,
        );
        let e = entry(&feed, "b");
        assert_eq!(e.content().mime_type(), "image/png");
        assert_eq!(e.content().data(), &ContentData::Binary(vec![0x89, b'P', b'N', b'G'].into()));
    }

    #[test]
    fn test_atom03_defaults() {
        let feed = parse(
            r#"<feed version="0.3" xmlns="http://purl.org/atom/ns#">
                <title>Old</title>
                <tagline>Tag</tagline>
                <entry>
                    <id>o1</id>
                    <modified>2004-01-01T00:00:00Z</modified>
                    <created>2003-01-01T00:00:00Z</created>
                    <content type="application/xhtml+xml"><div xmlns="http://www.w3.org/1999/xhtml">Inline <b>x</b></div></content>
                </entry>
            </feed>"#,
        );
        let f = feed.read();
        assert_eq!(f.title().as_text(), Some("Old"));
        assert_eq!(f.tagline().as_text(), Some("Tag"));
        drop(f);
        let e = entry(&feed, "o1");
        assert_eq!(e.content().mime_type(), XHTML);
        assert_eq!(e.content().as_text(), Some("Inline <b>x</b>"));
        assert_eq!(
            e.published().map(|d| d.to_rfc3339()),
            Some("2004-01-01T00:00:00+00:00".to_string())
        );
    }

    #[test]
    fn test_unknown_type_kept_verbatim() {
        let feed = parse(
            r#"<feed xmlns="http://www.w3.org/2005/Atom"><entry><id>u</id>
                <content type="text/x-markdown">  *hi*  </content></entry></feed>"#,
        );
        let e = entry(&feed, "u");
        assert_eq!(e.content().mime_type(), "text/x-markdown");
        assert_eq!(e.content().as_text(), Some("  *hi*  "));
    }
}
