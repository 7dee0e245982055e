//! RSS 0.9x, 1.0 (RDF) and 2.0 grammar.
use super::dates::parse_date;
use super::driver::{Element, ParseCx};
use super::names::Name;
use super::state::{ItemScratch, ParseState, Permalink, RssContext};
use crate::model::{Content, LinkRelation, Person, TEXT_HTML, TEXT_PLAIN, XHTML};
use crate::util::{looks_like_html, parse_author};

// ===== Root =====

pub(crate) fn root_start(mut ctx: RssContext, cx: &mut ParseCx, el: &Element) -> ParseState {
    match el.name {
        Name::Channel => ParseState::RssChannel(ctx),
        // RSS 1.0 places items next to the channel
        Name::Item => {
            ctx.items_outside_channel = true;
            cx.begin_entry();
            ParseState::RssItem(ctx, ItemScratch::default())
        }
        _ => ParseState::RssRoot(ctx),
    }
}

pub(crate) fn root_end(ctx: RssContext, name: Name) -> ParseState {
    match name {
        Name::Rss | Name::RdfRoot => ParseState::Done,
        _ => ParseState::RssRoot(ctx),
    }
}

// ===== Channel =====

pub(crate) fn channel_start(ctx: RssContext, cx: &mut ParseCx, el: &Element) -> ParseState {
    match el.name {
        Name::Item => {
            cx.begin_entry();
            return ParseState::RssItem(ctx, ItemScratch::default());
        }
        Name::Image => return ParseState::RssImage(ctx),
        Name::Title => {
            let base = cx.current_base();
            cx.with_feed(|feed| prepare(feed.title_mut(), ctx.version.default_content_type(), base));
        }
        Name::Description => {
            let mime_type = declared_type(ctx, el);
            let base = cx.current_base();
            cx.with_feed(|feed| prepare(feed.tagline_mut(), &mime_type, base));
        }
        _ => {}
    }
    ParseState::RssChannel(ctx)
}

pub(crate) fn channel_end(ctx: RssContext, cx: &mut ParseCx, name: Name) -> ParseState {
    match name {
        Name::Channel => return ParseState::RssRoot(ctx),
        Name::Title => {
            let text = cx.take_text();
            cx.with_feed(|feed| store_value(ctx, feed.title_mut(), text.trim()));
        }
        Name::Description => {
            let text = cx.take_text();
            cx.with_feed(|feed| store_value(ctx, feed.tagline_mut(), &text));
        }
        Name::Link => {
            let text = cx.take_text();
            // <atom:link rel="self"/> normalizes to an empty <link>
            if !text.trim().is_empty() {
                let uri = cx.resolve_link(&text);
                cx.with_feed(|feed| feed.link_mut().uri = uri);
            }
        }
        Name::Author | Name::ManagingEditor | Name::DcCreator => {
            let text = cx.take_text();
            cx.with_feed(|feed| update_author(feed.author_mut(), &text));
        }
        Name::WebMaster => {
            let text = cx.take_text();
            cx.with_feed(|feed| {
                if !feed.author().has_email() {
                    update_author(feed.author_mut(), &text);
                }
            });
        }
        Name::UpdatePeriod => {
            let minutes = period_minutes(&cx.take_text());
            if minutes > 0 {
                cx.with_feed(|feed| set_update_interval(feed.overrides_mut(), minutes));
            }
        }
        Name::UpdateFrequency => {
            let times: u32 = cx.take_text().trim().parse().unwrap_or(0);
            if times > 0 {
                cx.with_feed(|feed| {
                    let period = feed.overrides().update_interval_minutes.unwrap_or(60);
                    set_update_interval(feed.overrides_mut(), (period / times).max(1));
                });
            }
        }
        _ => {}
    }
    ParseState::RssChannel(ctx)
}

// ===== Image =====

pub(crate) fn image_end(ctx: RssContext, cx: &mut ParseCx, name: Name) -> ParseState {
    match name {
        Name::Image => ParseState::RssChannel(ctx),
        Name::Url => {
            let text = cx.take_text();
            let uri = cx.resolve_link(&text);
            cx.with_feed(|feed| {
                if feed.icon().is_none() {
                    feed.set_icon(Some(uri));
                }
            });
            ParseState::RssImage(ctx)
        }
        _ => ParseState::RssImage(ctx),
    }
}

// ===== Item =====

pub(crate) fn item_start(
    ctx: RssContext,
    mut scratch: ItemScratch,
    cx: &mut ParseCx,
    el: &Element,
) -> ParseState {
    match el.name {
        Name::Title => {
            let base = cx.current_base();
            prepare(cx.entry_mut().title_mut(), ctx.version.default_content_type(), base);
        }
        Name::Guid => {
            // RSS 2.0: a guid is a permalink unless it says otherwise
            scratch.permalink = match el.attr("isPermaLink").map(str::trim) {
                Some(v) if v.eq_ignore_ascii_case("false") || v == "0" => Permalink::No,
                Some(v) if v.eq_ignore_ascii_case("true") || v == "1" => Permalink::Yes,
                _ => Permalink::Maybe,
            };
        }
        Name::Description => {
            if !cx.entry_mut().content().has_type() {
                let mime_type = declared_type(ctx, el);
                let base = cx.current_base();
                prepare(cx.entry_mut().content_mut(), &mime_type, base);
            }
        }
        Name::ContentEncoded => {
            if !scratch.have_xml_content {
                let base = cx.current_base();
                prepare(cx.entry_mut().content_mut(), TEXT_HTML, base);
            }
        }
        Name::XhtmlBody => {
            let base = cx.current_base();
            prepare(cx.entry_mut().content_mut(), XHTML, base);
            cx.keep_markup(false);
            scratch.have_xml_content = true;
        }
        Name::Enclosure => {
            let uri = el.attr("url").map(|raw| cx.resolve_link(raw)).unwrap_or_default();
            let link = cx.entry_mut().add_link(LinkRelation::Enclosure);
            link.uri = uri;
            link.mime_type = el.attr("type").map(str::to_string);
            link.length = el.attr("length").and_then(|v| v.trim().parse().ok());
        }
        _ => {}
    }
    ParseState::RssItem(ctx, scratch)
}

pub(crate) fn item_end(
    ctx: RssContext,
    mut scratch: ItemScratch,
    cx: &mut ParseCx,
    name: Name,
) -> ParseState {
    match name {
        Name::Item => {
            let entry = cx.entry_mut();
            if !entry.content().has_type() {
                entry.content_mut().set_type(ctx.version.default_content_type());
            }
            cx.commit_entry();
            return if ctx.items_outside_channel {
                ParseState::RssRoot(ctx)
            } else {
                ParseState::RssChannel(ctx)
            };
        }
        Name::Title => {
            let text = cx.take_text();
            store_value(ctx, cx.entry_mut().title_mut(), text.trim());
        }
        Name::Link => {
            if scratch.permalink != Permalink::Yes {
                let text = cx.take_text();
                let uri = cx.resolve_link(&text);
                let link = cx.entry_mut().alternate_link_mut();
                if !link.has_uri() {
                    link.uri = uri;
                }
            }
        }
        Name::Author | Name::ManagingEditor | Name::DcCreator => {
            let text = cx.take_text();
            update_author(cx.entry_mut().author_mut(), &text);
            scratch.have_author = true;
        }
        Name::WebMaster => {
            if !scratch.have_author {
                let text = cx.take_text();
                update_author(cx.entry_mut().author_mut(), &text);
            }
        }
        Name::Source => {
            let text = cx.take_text();
            let author = cx.entry_mut().author_mut();
            if !author.has_name() {
                update_author(author, &text);
            }
        }
        Name::Guid => {
            let text = cx.take_text();
            let use_as_link = match scratch.permalink {
                Permalink::Yes => true,
                Permalink::Maybe => !has_alternate_uri(cx),
                Permalink::No => false,
            };
            let uri = use_as_link.then(|| cx.resolve_link(&text));
            let entry = cx.entry_mut();
            entry.set_guid(text);
            if let Some(uri) = uri {
                entry.alternate_link_mut().uri = uri;
            }
        }
        Name::PubDate => {
            if let Some(date) = parse_date(&cx.take_text()) {
                cx.entry_mut().set_published(Some(date));
            }
        }
        Name::Description => {
            let text = cx.take_text();
            let content = cx.entry_mut().content_mut();
            if !content.has_value() {
                store_value(ctx, content, &text);
            }
        }
        Name::ContentEncoded => {
            if !scratch.have_xml_content {
                let text = cx.take_text();
                store_value(ctx, cx.entry_mut().content_mut(), &text);
            }
        }
        Name::XhtmlBody => {
            let text = cx.take_text();
            cx.entry_mut().content_mut().set_text(text);
        }
        Name::Category => {
            let text = cx.take_text();
            append_property(cx, "category", text.trim());
        }
        Name::Comments => {
            let text = cx.take_text();
            if !text.trim().is_empty() {
                let uri = cx.resolve_link(&text);
                cx.entry_mut().set_property("comments", uri);
            }
        }
        _ => {}
    }
    ParseState::RssItem(ctx, scratch)
}

// ===== Helpers =====

fn prepare(content: &mut Content, mime_type: &str, base: Option<url::Url>) {
    content.set_type(mime_type);
    content.set_base_uri(base);
}

fn declared_type(ctx: RssContext, el: &Element) -> String {
    el.attr("type")
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unwrap_or(ctx.version.default_content_type())
        .to_string()
}

// 0.91 and 1.0 promise plain text, but many such feeds carry HTML anyway.
fn store_value(ctx: RssContext, content: &mut Content, text: &str) {
    if ctx.version.sniffs_html()
        && content.mime_type().eq_ignore_ascii_case(TEXT_PLAIN)
        && looks_like_html(text)
    {
        content.set_type(TEXT_HTML);
    }
    content.set_text(text);
}

fn update_author(person: &mut Person, raw: &str) {
    let (email, name) = parse_author(raw);
    if email.is_some() {
        person.email = email;
    }
    if name.is_some() {
        person.name = name;
    }
}

fn has_alternate_uri(cx: &mut ParseCx) -> bool {
    cx.entry_mut()
        .links()
        .iter()
        .any(|l| l.relation == LinkRelation::Alternate && l.has_uri())
}

fn append_property(cx: &mut ParseCx, key: &str, value: &str) {
    if value.is_empty() {
        return;
    }
    let entry = cx.entry_mut();
    let joined = match entry.property(key) {
        Some(existing) => format!("{existing}, {value}"),
        None => value.to_string(),
    };
    entry.set_property(key, joined);
}

fn period_minutes(value: &str) -> u32 {
    match value.trim().to_ascii_lowercase().as_str() {
        "hourly" => 60,
        "daily" => 24 * 60,
        // anything coarser than weekly is still checked weekly
        "weekly" | "monthly" | "yearly" => 7 * 24 * 60,
        other => other.parse().unwrap_or(0),
    }
}

fn set_update_interval(overrides: &mut crate::model::FeedOverrides, minutes: u32) {
    overrides.update_interval_minutes = Some(minutes);
    overrides.min_update_interval_minutes = Some(minutes);
}
