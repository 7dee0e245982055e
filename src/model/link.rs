use std::fmt;

/// Relation of a [`Link`] to the entry or feed that carries it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LinkRelation {
    #[default]
    Alternate,
    Related,
    Via,
    Enclosure,
}

impl LinkRelation {
    pub fn as_str(self) -> &'static str {
        match self {
            LinkRelation::Alternate => "alternate",
            LinkRelation::Related => "related",
            LinkRelation::Via => "via",
            LinkRelation::Enclosure => "enclosure",
        }
    }

    /// Case-insensitive parse of a `rel` value. Unknown relations yield `None`.
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        [
            LinkRelation::Alternate,
            LinkRelation::Related,
            LinkRelation::Via,
            LinkRelation::Enclosure,
        ]
        .into_iter()
        .find(|rel| rel.as_str().eq_ignore_ascii_case(value))
    }
}

impl fmt::Display for LinkRelation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A relation-typed URI reference.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Link {
    pub relation: LinkRelation,
    /// Absolute URI after base resolution; empty until assigned.
    pub uri: String,
    pub title: Option<String>,
    pub mime_type: Option<String>,
    /// Declared size in bytes, enclosures only.
    pub length: Option<u64>,
}

impl Link {
    pub fn new(relation: LinkRelation) -> Self {
        Self {
            relation,
            ..Self::default()
        }
    }

    pub fn with_uri(relation: LinkRelation, uri: impl Into<String>) -> Self {
        Self {
            relation,
            uri: uri.into(),
            ..Self::default()
        }
    }

    pub fn has_uri(&self) -> bool {
        !self.uri.is_empty()
    }
}
