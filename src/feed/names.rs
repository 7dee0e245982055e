//! Stable element names and the namespace-prefix table.
//!
//! Feeds use arbitrary prefixes for well-known namespaces. Every element and
//! attribute name is rewritten to a fixed prefix for its namespace (no prefix
//! for the RSS and Atom namespaces themselves) before the parse states see it.

/// Well-known feed namespaces and the prefix they are normalized to.
const KNOWN_NAMESPACES: &[(&str, &str)] = &[
    ("http://purl.org/rss/1.0/", ""),
    ("http://my.netscape.com/rdf/simple/0.9/", ""),
    ("http://backend.userland.com/rss2", ""),
    ("http://www.w3.org/2005/Atom", ""),
    ("http://purl.org/atom/ns#", ""),
    ("http://www.w3.org/1999/02/22-rdf-syntax-ns#", "rdf"),
    ("http://purl.org/dc/elements/1.1/", "dc"),
    ("http://purl.org/rss/1.0/modules/content/", "content"),
    ("http://purl.org/rss/1.0/modules/syndication/", "sy"),
    ("http://www.w3.org/1999/xhtml", "xhtml"),
    ("http://www.w3.org/XML/1998/namespace", "xml"),
    ("http://search.yahoo.com/mrss/", "media"),
    ("http://www.itunes.com/dtds/podcast-1.0.dtd", "itunes"),
];

const XML_NAMESPACE: &str = "http://www.w3.org/XML/1998/namespace";

fn canonical_prefix(uri: &str) -> Option<&'static str> {
    KNOWN_NAMESPACES
        .iter()
        .find(|(known, _)| *known == uri)
        .map(|(_, prefix)| *prefix)
}

/// Scoped prefix → namespace bindings declared by open elements.
#[derive(Debug, Default)]
pub(crate) struct NamespaceTable {
    // One frame per open element, usually empty.
    scopes: Vec<Vec<(String, String)>>,
}

impl NamespaceTable {
    /// Opens a scope with the `xmlns` declarations found in `attributes`.
    pub(crate) fn push_scope(&mut self, attributes: &[(String, String)]) {
        let frame = attributes
            .iter()
            .filter_map(|(key, value)| {
                if key == "xmlns" {
                    Some((String::new(), value.clone()))
                } else {
                    key.strip_prefix("xmlns:")
                        .map(|prefix| (prefix.to_string(), value.clone()))
                }
            })
            .collect();
        self.scopes.push(frame);
    }

    pub(crate) fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    fn lookup(&self, prefix: &str) -> Option<&str> {
        if prefix == "xml" {
            return Some(XML_NAMESPACE);
        }
        self.scopes
            .iter()
            .rev()
            .flat_map(|frame| frame.iter().rev())
            .find(|(declared, _)| declared == prefix)
            .map(|(_, uri)| uri.as_str())
    }

    /// Stable qualified name for an element.
    pub(crate) fn qualify_element(&self, raw: &str) -> String {
        let (prefix, local) = split_name(raw);
        self.qualify(raw, prefix.unwrap_or(""), local)
    }

    /// Stable qualified name for an attribute. Unprefixed attributes have no
    /// namespace and keep their local name.
    pub(crate) fn qualify_attribute(&self, raw: &str) -> String {
        match split_name(raw) {
            (Some(prefix), local) => self.qualify(raw, prefix, local),
            (None, local) => local.to_string(),
        }
    }

    fn qualify(&self, raw: &str, prefix: &str, local: &str) -> String {
        match self.lookup(prefix).and_then(canonical_prefix) {
            Some("") => local.to_string(),
            Some(canonical) => format!("{canonical}:{local}"),
            // unknown namespace: keep what the document wrote
            None if prefix.is_empty() => local.to_string(),
            None => raw.to_string(),
        }
    }
}

fn split_name(raw: &str) -> (Option<&str>, &str) {
    match raw.split_once(':') {
        Some((prefix, local)) => (Some(prefix), local),
        None => (None, raw),
    }
}

/// Element names the parse states react to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Name {
    Rss,
    RdfRoot,
    Channel,
    Item,
    Image,
    Url,
    Title,
    Link,
    Description,
    ContentEncoded,
    /// `body`, `div` and their XHTML-namespaced forms.
    XhtmlBody,
    Guid,
    /// `pubDate`, `lastBuildDate` and `dc:date`.
    PubDate,
    Author,
    ManagingEditor,
    WebMaster,
    DcCreator,
    Source,
    Enclosure,
    /// `ttl` and `sy:updatePeriod`.
    UpdatePeriod,
    UpdateFrequency,
    Category,
    Comments,
    Feed,
    Entry,
    Name,
    Email,
    /// `subtitle` and the Atom 0.3 `tagline`.
    Subtitle,
    Summary,
    Content,
    Id,
    /// `updated` and the Atom 0.3 `modified`.
    Updated,
    /// `published` and the Atom 0.3 `created`.
    Published,
    Icon,
    Other,
}

impl Name {
    /// Case-insensitive classification of a stable qualified name.
    /// `rss:` and `atom:` prefixes are accepted as synonyms of the bare name.
    pub(crate) fn classify(qname: &str) -> Name {
        let lower = qname.to_ascii_lowercase();
        let bare = lower
            .strip_prefix("rss:")
            .or_else(|| lower.strip_prefix("atom:"))
            .unwrap_or(&lower);

        match bare {
            "rss" => Name::Rss,
            "rdf:rdf" => Name::RdfRoot,
            "channel" => Name::Channel,
            "item" => Name::Item,
            "image" => Name::Image,
            "url" => Name::Url,
            "title" => Name::Title,
            "link" => Name::Link,
            "description" => Name::Description,
            "content:encoded" => Name::ContentEncoded,
            "body" | "div" | "xhtml:body" | "xhtml:div" => Name::XhtmlBody,
            "guid" => Name::Guid,
            "pubdate" | "lastbuilddate" | "dc:date" => Name::PubDate,
            "author" => Name::Author,
            "managingeditor" => Name::ManagingEditor,
            "webmaster" => Name::WebMaster,
            "dc:creator" => Name::DcCreator,
            "source" => Name::Source,
            "enclosure" => Name::Enclosure,
            "ttl" | "sy:updateperiod" => Name::UpdatePeriod,
            "sy:updatefrequency" => Name::UpdateFrequency,
            "category" | "dc:subject" => Name::Category,
            "comments" => Name::Comments,
            "feed" => Name::Feed,
            "entry" => Name::Entry,
            "name" => Name::Name,
            "email" => Name::Email,
            "subtitle" | "tagline" => Name::Subtitle,
            "summary" => Name::Summary,
            "content" => Name::Content,
            "id" => Name::Id,
            "updated" | "modified" => Name::Updated,
            "published" | "created" => Name::Published,
            "icon" => Name::Icon,
            _ => Name::Other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_known_prefixes_are_normalized() {
        let mut table = NamespaceTable::default();
        table.push_scope(&attrs(&[
            ("xmlns", "http://purl.org/rss/1.0/"),
            ("xmlns:d", "http://purl.org/dc/elements/1.1/"),
            ("xmlns:r", "http://www.w3.org/1999/02/22-rdf-syntax-ns#"),
        ]));
        assert_eq!(table.qualify_element("item"), "item");
        assert_eq!(table.qualify_element("d:creator"), "dc:creator");
        assert_eq!(table.qualify_element("r:RDF"), "rdf:RDF");
        assert_eq!(table.qualify_attribute("r:about"), "rdf:about");
        assert_eq!(table.qualify_attribute("xml:base"), "xml:base");
    }

    #[test]
    fn test_default_namespace_switch_inside_content() {
        let mut table = NamespaceTable::default();
        table.push_scope(&attrs(&[("xmlns", "http://www.w3.org/2005/Atom")]));
        assert_eq!(table.qualify_element("content"), "content");

        table.push_scope(&attrs(&[("xmlns", "http://www.w3.org/1999/xhtml")]));
        assert_eq!(table.qualify_element("div"), "xhtml:div");
        table.pop_scope();
        assert_eq!(table.qualify_element("div"), "div");
    }

    #[test]
    fn test_unknown_namespaces_keep_document_prefix() {
        let mut table = NamespaceTable::default();
        table.push_scope(&attrs(&[("xmlns:foo", "http://example.com/ns")]));
        assert_eq!(table.qualify_element("foo:bar"), "foo:bar");
        assert_eq!(table.qualify_element("undeclared:x"), "undeclared:x");
    }

    #[test]
    fn test_classify_is_case_insensitive_with_synonyms() {
        assert_eq!(Name::classify("pubDate"), Name::PubDate);
        assert_eq!(Name::classify("rss:channel"), Name::Channel);
        assert_eq!(Name::classify("atom:entry"), Name::Entry);
        assert_eq!(Name::classify("rdf:RDF"), Name::RdfRoot);
        assert_eq!(Name::classify("xhtml:div"), Name::XhtmlBody);
        assert_eq!(Name::classify("sy:updatePeriod"), Name::UpdatePeriod);
        assert_eq!(Name::classify("content:encoded"), Name::ContentEncoded);
        assert_eq!(Name::classify("media:thumbnail"), Name::Other);
    }
}
