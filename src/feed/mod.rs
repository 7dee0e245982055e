//! Streaming RSS and Atom parser.
//!
//! Documents are tokenized incrementally with `quick-xml`, so bytes can be
//! fed as they arrive from the network. Element names are normalized through
//! a namespace table, then dispatched to a per-grammar state machine that
//! fills in a [`Feed`](crate::model::Feed):
//!
//! - `driver` - chunk buffering, element stacks, `xml:base`, markup retention
//! - `rss` - RSS 0.91 through 2.0 and RDF-based RSS 1.0
//! - `atom` - Atom 0.3 and 1.0
//!
//! Only the predefined XML entities and a few common HTML ones are expanded.
//! DTDs are never read, so external entities are never fetched.

mod atom;
pub mod dates;
mod driver;
mod names;
mod rss;
mod state;

pub use dates::{parse_date, parse_rfc3339};
pub use driver::{FeedParser, ParseError, ParseObserver};
pub use state::{AtomVersion, FeedFormat, RssVersion};
