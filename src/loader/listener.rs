use tokio::sync::mpsc;

use crate::model::{EntryId, FeedHandle, FeedId};
use crate::status::LoadStatus;

/// Receives load events.
///
/// Registered with [`LoadManager::add_listener`](super::LoadManager::add_listener)
/// a listener sees every event of every feed; passed to `load_feed` or
/// `update_feed` it only sees that unit. Callbacks run on runtime threads
/// and must not block.
pub trait FeedListener: Send + Sync {
    /// Terminal callback of a unit. `feed` is `None` when nothing was parsed,
    /// including every abort.
    fn on_feed_loaded(&self, _feed: Option<&FeedHandle>, _status: LoadStatus) {}

    /// A newer version of a stored entry replaced it.
    fn on_entry_loaded(&self, _feed: &FeedHandle, _entry: EntryId) {}

    /// An entry not seen before was added.
    fn on_new_entry_loaded(&self, _feed: &FeedHandle, _entry: EntryId) {}

    /// All units started by one `update_all` call have finished.
    fn on_update_finished(&self) {}
}

/// Load event forwarded by [`ChannelListener`].
#[derive(Debug, Clone)]
pub enum LoadEvent {
    FeedLoaded {
        feed: Option<FeedId>,
        status: LoadStatus,
    },
    EntryLoaded {
        feed: FeedId,
        entry: EntryId,
        is_new: bool,
    },
    UpdateFinished,
}

/// Listener that forwards events to an unbounded channel.
pub struct ChannelListener {
    tx: mpsc::UnboundedSender<LoadEvent>,
}

impl ChannelListener {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<LoadEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, event: LoadEvent) {
        // receiver gone: nobody is interested any more
        let _ = self.tx.send(event);
    }
}

impl FeedListener for ChannelListener {
    fn on_feed_loaded(&self, feed: Option<&FeedHandle>, status: LoadStatus) {
        self.send(LoadEvent::FeedLoaded {
            feed: feed.map(FeedHandle::id),
            status,
        });
    }

    fn on_entry_loaded(&self, feed: &FeedHandle, entry: EntryId) {
        self.send(LoadEvent::EntryLoaded {
            feed: feed.id(),
            entry,
            is_new: false,
        });
    }

    fn on_new_entry_loaded(&self, feed: &FeedHandle, entry: EntryId) {
        self.send(LoadEvent::EntryLoaded {
            feed: feed.id(),
            entry,
            is_new: true,
        });
    }

    fn on_update_finished(&self) {
        self.send(LoadEvent::UpdateFinished);
    }
}
