use std::sync::Arc;
use url::Url;

use super::bindings::ScriptBindings;

pub const TEXT_PLAIN: &str = "text/plain";
pub const TEXT_HTML: &str = "text/html";
pub const XHTML: &str = "application/xhtml+xml";

/// Payload of a [`Content`] construct.
///
/// Cloning shares the underlying buffer.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum ContentData {
    #[default]
    Empty,
    Text(Arc<str>),
    Binary(Arc<[u8]>),
}

/// A typed text or binary payload: titles, taglines, summaries and bodies.
///
/// The MIME type stays unset until a parser or the store assigns one, which
/// lets the parser tell "no content seen yet" apart from "plain text content".
#[derive(Debug, Clone, Default)]
pub struct Content {
    data: ContentData,
    mime_type: Option<Arc<str>>,
    base_uri: Option<Url>,
    bindings: ScriptBindings,
}

impl Content {
    pub fn new() -> Self {
        Self::default()
    }

    /// Text content with an explicit MIME type.
    pub fn text(mime_type: &str, value: impl Into<Arc<str>>) -> Self {
        Self {
            data: ContentData::Text(value.into()),
            mime_type: Some(Arc::from(mime_type)),
            ..Self::default()
        }
    }

    pub fn plain(value: impl Into<Arc<str>>) -> Self {
        Self::text(TEXT_PLAIN, value)
    }

    pub fn has_type(&self) -> bool {
        self.mime_type.is_some()
    }

    /// MIME type, `text/plain` when none was assigned.
    pub fn mime_type(&self) -> &str {
        self.mime_type.as_deref().unwrap_or(TEXT_PLAIN)
    }

    pub fn set_type(&mut self, mime_type: &str) {
        if self.mime_type.as_deref() != Some(mime_type) {
            self.mime_type = Some(Arc::from(mime_type));
        }
    }

    pub fn has_value(&self) -> bool {
        !matches!(self.data, ContentData::Empty)
    }

    pub fn data(&self) -> &ContentData {
        &self.data
    }

    pub fn set_text(&mut self, value: impl Into<Arc<str>>) {
        self.data = ContentData::Text(value.into());
    }

    pub fn set_binary(&mut self, bytes: impl Into<Arc<[u8]>>) {
        self.data = ContentData::Binary(bytes.into());
    }

    /// Drops the payload, keeping type and base.
    pub fn clear_value(&mut self) {
        self.data = ContentData::Empty;
    }

    /// Text payload, `None` for binary or empty content.
    pub fn as_text(&self) -> Option<&str> {
        match &self.data {
            ContentData::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Text payload or the empty string.
    pub fn text_or_empty(&self) -> &str {
        self.as_text().unwrap_or("")
    }

    pub fn as_bytes(&self) -> &[u8] {
        match &self.data {
            ContentData::Empty => &[],
            ContentData::Text(text) => text.as_bytes(),
            ContentData::Binary(bytes) => bytes,
        }
    }

    pub fn byte_len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_binary(&self) -> bool {
        matches!(self.data, ContentData::Binary(_))
    }

    pub fn is_plain_text(&self) -> bool {
        !self.is_binary() && self.mime_type().eq_ignore_ascii_case(TEXT_PLAIN)
    }

    /// HTML, XHTML or any other XML-based markup type.
    pub fn is_markup(&self) -> bool {
        let mime = self.mime_type().to_ascii_lowercase();
        mime == TEXT_HTML || mime == XHTML || mime == "text/xml" || mime.ends_with("+xml")
    }

    pub fn base_uri(&self) -> Option<&Url> {
        self.base_uri.as_ref()
    }

    pub fn set_base_uri(&mut self, base: Option<Url>) {
        self.base_uri = base;
    }

    /// True when both values point at the same shared buffer.
    pub fn shares_payload(&self, other: &Content) -> bool {
        match (&self.data, &other.data) {
            (ContentData::Text(a), ContentData::Text(b)) => Arc::ptr_eq(a, b),
            (ContentData::Binary(a), ContentData::Binary(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    pub fn bindings(&self) -> &ScriptBindings {
        &self.bindings
    }

    pub fn bindings_mut(&mut self) -> &mut ScriptBindings {
        &mut self.bindings
    }
}

/// Equality covers payload, type and base; script bindings are not part of the value.
impl PartialEq for Content {
    fn eq(&self, other: &Self) -> bool {
        self.data == other.data
            && self.mime_type() == other.mime_type()
            && self.base_uri == other.base_uri
    }
}
