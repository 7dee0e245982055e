use lru::LruCache;
use std::num::NonZeroUsize;

use crate::model::{FeedHandle, FeedId};

/// Fixed-capacity set of resident feeds, evicted in insertion order.
///
/// Lookups use `peek`, so reading a feed never refreshes its position.
pub(crate) struct FeedCache {
    feeds: LruCache<FeedId, FeedHandle>,
}

impl FeedCache {
    pub(crate) fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            feeds: LruCache::new(capacity),
        }
    }

    pub(crate) fn get(&self, id: FeedId) -> Option<&FeedHandle> {
        self.feeds.peek(&id)
    }

    /// Inserts `handle`, returning the oldest resident feed if one had to go.
    pub(crate) fn insert(&mut self, handle: FeedHandle) -> Option<FeedHandle> {
        match self.feeds.push(handle.id(), handle) {
            Some((id, evicted)) if self.feeds.peek(&id).is_none() => Some(evicted),
            // same id replaced, nothing left the cache
            _ => None,
        }
    }

    pub(crate) fn remove(&mut self, id: FeedId) -> Option<FeedHandle> {
        self.feeds.pop(&id)
    }

    pub(crate) fn handles(&self) -> impl Iterator<Item = &FeedHandle> {
        self.feeds.iter().map(|(_, handle)| handle)
    }

    pub(crate) fn len(&self) -> usize {
        self.feeds.len()
    }
}
