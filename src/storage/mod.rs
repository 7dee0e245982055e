//! On-disk feed store.
//!
//! Layout of a store directory:
//!
//! ```text
//! feeds.xml        settings, space factor and one stub per feed
//! feed_<id>.xml    entries of one feed
//! icons/<id>.<ext> feed icons
//! ```
//!
//! Every write goes to a temporary file that atomically replaces the target.

mod atomic;
mod cache;
mod format;
mod quota;
mod store;
mod stub;
mod types;

pub use store::FeedStore;
pub use stub::Stub;
pub use types::{GlobalSettings, StoreError};
