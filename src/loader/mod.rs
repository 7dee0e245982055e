//! Bounded, coalescing fetch+parse scheduler.
//!
//! [`LoadManager`] runs each load as a tokio task through a [`Transport`]
//! and reports progress to [`FeedListener`]s.

mod icon;
mod listener;
mod manager;
mod transport;
mod unit;

pub use listener::{ChannelListener, FeedListener, LoadEvent};
pub use manager::{Admission, LoadError, LoadManager, LoaderConfig};
pub use transport::{HttpTransport, Transport, TransportError, TransportRequest, TransportResponse};
