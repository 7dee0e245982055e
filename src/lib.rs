//! RSS/Atom aggregation engine.
//!
//! - [`feed`] - streaming, version-aware RSS and Atom parser
//! - [`loader`] - bounded, coalescing fetch+parse scheduler
//! - [`storage`] - on-disk feed store with lazy loading and a disk quota
//! - [`model`] - feeds, entries and content shared by all of the above

pub mod config;
pub mod feed;
pub mod loader;
pub mod model;
pub mod status;
pub mod storage;
pub mod util;

pub use status::LoadStatus;
