//! Integration tests for the streaming parser: format sniffing, content
//! types and duplicate reconciliation across reparses of the same feed.

use feedengine::feed::{AtomVersion, FeedFormat, FeedParser, RssVersion};
use feedengine::model::{FeedHandle, ReadStatus, TEXT_HTML, TEXT_PLAIN, XHTML};
use pretty_assertions::assert_eq;
use url::Url;

fn parse_at(url: &str, doc: &str) -> (FeedHandle, Option<FeedFormat>) {
    let mut parser = FeedParser::new(Some(Url::parse(url).unwrap()));
    parser.feed_bytes(doc.as_bytes(), true).unwrap();
    let feed = parser.finish().unwrap();
    (feed, parser.format())
}

fn parse(doc: &str) -> (FeedHandle, Option<FeedFormat>) {
    parse_at("http://example.com/rss", doc)
}

// ============================================================================
// RSS
// ============================================================================

#[test]
fn test_guid_not_permalink_keeps_explicit_link() {
    let (feed, format) = parse(
        r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>Example</title>
<item><guid isPermaLink="false">abc123</guid><link>http://example.com/a</link><title>T</title></item>
</channel></rss>"#,
    );
    assert_eq!(format, Some(FeedFormat::Rss(RssVersion::V20)));

    let feed = feed.read();
    assert_eq!(feed.entries().len(), 1);
    let entry = &feed.entries()[0];
    assert_eq!(entry.guid(), Some("abc123"));
    assert_eq!(entry.primary_link(), Some("http://example.com/a"));
    assert_eq!(entry.title().as_text(), Some("T"));
    assert_eq!(entry.content().mime_type(), TEXT_HTML);
}

#[test]
fn test_rss_version_sniffing() {
    let cases = [
        ("0.91", RssVersion::V091, TEXT_PLAIN),
        ("0.92", RssVersion::V092, TEXT_HTML),
        ("0.93", RssVersion::V093, TEXT_HTML),
        ("0.94", RssVersion::V094, TEXT_HTML),
        ("2.0", RssVersion::V20, TEXT_HTML),
        ("2.01", RssVersion::V20, TEXT_HTML),
        ("7", RssVersion::V20, TEXT_HTML),
    ];
    for (attr, version, mime) in cases {
        let doc = format!(
            r#"<rss version="{attr}"><channel><item><title>x</title><description>words only</description></item></channel></rss>"#
        );
        let (feed, format) = parse(&doc);
        assert_eq!(format, Some(FeedFormat::Rss(version)), "version {attr}");
        assert_eq!(feed.read().entries()[0].content().mime_type(), mime, "version {attr}");
    }
}

#[test]
fn test_missing_version_defaults_to_rss2() {
    let (_, format) = parse("<rss><channel><title>x</title></channel></rss>");
    assert_eq!(format, Some(FeedFormat::Rss(RssVersion::V20)));
}

#[test]
fn test_rdf_items_outside_channel() {
    let (feed, format) = parse(
        r#"<rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#" xmlns="http://purl.org/rss/1.0/">
<channel><title>RDF feed</title><link>http://example.com/</link></channel>
<item><title>One</title><link>http://example.com/1</link><description>Plain words</description></item>
<item><title>Two</title><link>http://example.com/2</link><description>&lt;b&gt;bold&lt;/b&gt;</description></item>
</rdf:RDF>"#,
    );
    assert_eq!(format, Some(FeedFormat::Rss(RssVersion::V10)));

    let feed = feed.read();
    assert_eq!(feed.title().as_text(), Some("RDF feed"));
    assert_eq!(feed.entries().len(), 2);
    let by_title = |t: &str| {
        feed.entries()
            .iter()
            .find(|e| e.title().as_text() == Some(t))
            .cloned()
            .unwrap()
    };
    assert_eq!(by_title("One").content().mime_type(), TEXT_PLAIN);
    assert_eq!(by_title("Two").content().mime_type(), TEXT_HTML);
}

#[test]
fn test_channel_extras() {
    let (feed, _) = parse(
        r#"<rss version="2.0" xmlns:sy="http://purl.org/rss/1.0/modules/syndication/"><channel>
<title>Extras</title>
<managingEditor>editor@example.com (Ed Itor)</managingEditor>
<sy:updatePeriod>daily</sy:updatePeriod>
<sy:updateFrequency>2</sy:updateFrequency>
<item>
  <title>With enclosure</title>
  <guid>http://example.com/e1</guid>
  <pubDate>Tue, 02 Jan 2024 10:00:00 GMT</pubDate>
  <enclosure url="http://example.com/e1.mp3" type="audio/mpeg" length="1234"/>
</item>
</channel></rss>"#,
    );
    let feed = feed.read();
    assert_eq!(feed.author().email.as_deref(), Some("editor@example.com"));
    assert_eq!(feed.overrides().update_interval_minutes, Some(720));
    assert_eq!(feed.overrides().min_update_interval_minutes, Some(720));

    let entry = &feed.entries()[0];
    assert_eq!(
        entry.published().map(|d| d.to_rfc3339()),
        Some("2024-01-02T10:00:00+00:00".to_string())
    );
    let enclosure = entry.enclosures().next().unwrap();
    assert_eq!(enclosure.uri, "http://example.com/e1.mp3");
    assert_eq!(enclosure.mime_type.as_deref(), Some("audio/mpeg"));
    assert_eq!(enclosure.length, Some(1234));
}

#[test]
fn test_relative_links_resolve_against_document() {
    let (feed, _) = parse_at(
        "http://example.com/blog/feed.xml",
        r#"<rss version="2.0"><channel><link>/blog/</link><item><title>a</title><link>posts/1</link></item></channel></rss>"#,
    );
    let feed = feed.read();
    assert_eq!(feed.link().uri, "http://example.com/blog/");
    assert_eq!(
        feed.entries()[0].primary_link(),
        Some("http://example.com/blog/posts/1")
    );
}

// ============================================================================
// Atom
// ============================================================================

#[test]
fn test_atom10_content_constructs() {
    let (feed, format) = parse(
        r#"<feed xmlns="http://www.w3.org/2005/Atom">
<title>Atom</title>
<link rel="self" href="http://example.com/atom"/>
<entry>
  <id>urn:1</id><title type="text">Plain</title>
  <updated>2024-01-02T00:00:00Z</updated>
  <content type="html">&lt;p&gt;Hi&lt;/p&gt;</content>
</entry>
<entry>
  <id>urn:2</id><title>Xhtml</title>
  <updated>2024-01-01T00:00:00Z</updated>
  <content type="xhtml"><div xmlns="http://www.w3.org/1999/xhtml"><p>Body</p></div></content>
</entry>
</feed>"#,
    );
    assert_eq!(format, Some(FeedFormat::Atom(AtomVersion::V10)));

    let feed = feed.read();
    assert_eq!(feed.link().uri, "http://example.com/atom");
    let entries = feed.entries();
    assert_eq!(entries[0].guid(), Some("urn:1"));
    assert_eq!(entries[0].title().mime_type(), TEXT_PLAIN);
    assert_eq!(entries[0].content().mime_type(), TEXT_HTML);
    assert_eq!(entries[0].content().as_text(), Some("<p>Hi</p>"));
    assert_eq!(entries[1].content().mime_type(), XHTML);
    assert_eq!(entries[1].content().as_text(), Some("<p>Body</p>"));
}

#[test]
fn test_atom03_title_defaults_to_escaped_mode() {
    let (feed, format) = parse(
        r#"<feed version="0.3" xmlns="http://purl.org/atom/ns#">
<title>Old &amp;amp; new</title>
<entry><id>urn:x</id><title>t</title><modified>2004-01-01T00:00:00Z</modified></entry>
</feed>"#,
    );
    assert_eq!(format, Some(FeedFormat::Atom(AtomVersion::V03)));
    assert_eq!(feed.read().title().as_text(), Some("Old &amp; new"));
}

#[test]
fn test_atom_published_does_not_override_updated() {
    let (feed, _) = parse(
        r#"<feed xmlns="http://www.w3.org/2005/Atom"><entry>
<id>urn:d</id>
<updated>2024-03-01T00:00:00Z</updated>
<published>2024-01-01T00:00:00Z</published>
</entry></feed>"#,
    );
    let feed = feed.read();
    assert_eq!(
        feed.entries()[0].published().map(|d| d.to_rfc3339()),
        Some("2024-03-01T00:00:00+00:00".to_string())
    );
}

// ============================================================================
// Reparse into an existing feed
// ============================================================================

const FIRST: &str = r#"<rss version="2.0"><channel><title>Example</title>
<item><guid>g1</guid><title>One</title><pubDate>Mon, 01 Jan 2024 00:00:00 GMT</pubDate></item>
<item><guid>g2</guid><title>Two</title><pubDate>Tue, 02 Jan 2024 00:00:00 GMT</pubDate></item>
</channel></rss>"#;

#[test]
fn test_reparse_same_document_is_idempotent() {
    let (feed, _) = parse(FIRST);
    let id = feed.read().entries()[0].id();
    feed.write().set_entry_status(id, ReadStatus::Read);

    let mut parser = FeedParser::new(None).reuse_feed(feed.clone());
    parser.feed_bytes(FIRST.as_bytes(), true).unwrap();
    parser.finish().unwrap();

    let feed = feed.read();
    assert_eq!(feed.entries().len(), 2);
    assert_eq!(feed.unread_count(), 1);
    assert_eq!(feed.entry(id).map(|e| e.status()), Some(ReadStatus::Read));
}

#[test]
fn test_newer_version_replaces_in_place() {
    let (feed, _) = parse(FIRST);
    let g2 = feed
        .read()
        .entries()
        .iter()
        .find(|e| e.guid() == Some("g2"))
        .map(|e| e.id())
        .unwrap();

    let updated = r#"<rss version="2.0"><channel>
<item><guid>g2</guid><title>Two, edited</title><pubDate>Wed, 03 Jan 2024 00:00:00 GMT</pubDate></item>
<item><guid>g3</guid><title>Three</title><pubDate>Thu, 04 Jan 2024 00:00:00 GMT</pubDate></item>
</channel></rss>"#;
    let mut parser = FeedParser::new(None).reuse_feed(feed.clone());
    parser.feed_bytes(updated.as_bytes(), true).unwrap();
    parser.finish().unwrap();

    let feed = feed.read();
    let titles: Vec<&str> = feed
        .entries()
        .iter()
        .map(|e| e.title().text_or_empty())
        .collect();
    assert_eq!(titles, vec!["Three", "Two, edited", "One"]);
    assert_eq!(feed.entry(g2).map(|e| e.title().text_or_empty()), Some("Two, edited"));
}
