//! Content model shared by the parser, the loader and the store.
//!
//! - [`Feed`] owns its [`Entry`] list and is shared through [`FeedHandle`]
//! - [`Entry`] items are addressed by `(FeedId, EntryId)` outside their feed
//! - [`Content`] payloads are reference counted and cheap to clone
//! - [`ScriptBindings`] carry opaque objects for a scripting bridge

mod bindings;
mod content;
mod entry;
mod feed;
mod link;
mod person;

pub use bindings::{EnvironmentId, ScriptBindings, ScriptObject};
pub use content::{Content, ContentData, TEXT_HTML, TEXT_PLAIN, XHTML};
pub use entry::{Entry, EntryId, ReadStatus};
pub use feed::{AddOutcome, Feed, FeedHandle, FeedId, FeedOverrides, HttpValidators, WeakFeed};
pub use link::{Link, LinkRelation};
pub use person::Person;
