use chrono::Utc;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use url::Url;

use super::listener::FeedListener;
use super::transport::Transport;
use super::unit::{self, UnitJob};
use crate::model::{EntryId, FeedHandle, FeedId};
use crate::status::LoadStatus;
use crate::storage::FeedStore;
use crate::util::lock;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum LoadError {
    /// Loads run as tokio tasks and need a runtime on the calling thread.
    #[error("No tokio runtime available to run feed loads")]
    NoRuntime,

    #[error("Invalid feed URL '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("Unknown feed id {0}")]
    UnknownFeed(FeedId),

    /// Updating stored feeds needs a store.
    #[error("Load manager has no feed store")]
    NoStore,
}

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// Units running at the same time; further requests wait in FIFO order.
    pub max_concurrent_loads: usize,
    /// A unit that receives no data within this time ends with `ServerTimeout`.
    pub load_timeout: Duration,
    pub icon_timeout: Duration,
    pub fetch_icons: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            max_concurrent_loads: 4,
            load_timeout: Duration::from_secs(30),
            icon_timeout: Duration::from_secs(10),
            fetch_icons: true,
        }
    }
}

/// How a load request was admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// A new unit started running.
    Started,
    /// A new unit waits for a free slot.
    Queued,
    /// A unit for the same URL was already active or queued; the listener
    /// was attached to it.
    Joined,
    /// Nothing to do; listeners were already notified with this status.
    Finished(LoadStatus),
}

// ============================================================================
// Scheduler
// ============================================================================

struct Slot {
    unit: u64,
    job: UnitJob,
    listeners: Vec<Arc<dyn FeedListener>>,
    abort: Arc<Notify>,
    aborted: bool,
    in_batch: bool,
}

impl Slot {
    fn matches(&self, url: &Url) -> bool {
        !self.aborted && self.job.url == *url
    }
}

#[derive(Default)]
struct Scheduler {
    active: Vec<Slot>,
    queue: VecDeque<Slot>,
    /// Units of the current `update_all` batch that have not finished.
    batch_remaining: usize,
}

pub(super) struct Inner {
    pub(super) config: LoaderConfig,
    pub(super) transport: Arc<dyn Transport>,
    pub(super) store: Option<Arc<Mutex<FeedStore>>>,
    listeners: Mutex<Vec<Arc<dyn FeedListener>>>,
    scheduler: Mutex<Scheduler>,
    next_unit: AtomicU64,
    idle: Notify,
    low_memory: AtomicBool,
}

impl Inner {
    fn global_listeners(&self) -> Vec<Arc<dyn FeedListener>> {
        lock(&self.listeners).clone()
    }

    pub(super) fn set_low_memory(&self) {
        if !self.low_memory.swap(true, Ordering::Relaxed) {
            tracing::warn!("Memory reservation failed, entering low-memory mode");
        }
    }

    /// Entry callbacks of one unit: engine-wide listeners first.
    pub(super) fn notify_entry(&self, unit: u64, feed: &FeedHandle, entry: EntryId, is_new: bool) {
        let mut listeners = self.global_listeners();
        {
            let scheduler = lock(&self.scheduler);
            if let Some(slot) = scheduler.active.iter().find(|s| s.unit == unit) {
                listeners.extend(slot.listeners.iter().cloned());
            }
        }
        for listener in &listeners {
            if is_new {
                listener.on_new_entry_loaded(feed, entry);
            } else {
                listener.on_entry_loaded(feed, entry);
            }
        }
    }

    fn spawn(self: &Arc<Self>, runtime: &Handle, slot: &Slot) {
        tracing::debug!(unit = slot.unit, url = %slot.job.url, "Starting feed load");
        runtime.spawn(unit::run(
            Arc::clone(self),
            slot.unit,
            slot.job.clone(),
            Arc::clone(&slot.abort),
        ));
    }

    /// Removes a finished unit, promotes one queued unit and reports the outcome.
    pub(super) fn finish_unit(self: &Arc<Self>, unit: u64, feed: Option<FeedHandle>, status: LoadStatus) {
        let (slot, batch_done, idle) = {
            let mut scheduler = lock(&self.scheduler);
            let Some(index) = scheduler.active.iter().position(|s| s.unit == unit) else {
                return;
            };
            let slot = scheduler.active.remove(index);
            let batch_done = slot.in_batch && {
                scheduler.batch_remaining = scheduler.batch_remaining.saturating_sub(1);
                scheduler.batch_remaining == 0
            };
            if let Some(next) = scheduler.queue.pop_front() {
                match Handle::try_current() {
                    Ok(runtime) => {
                        self.spawn(&runtime, &next);
                        scheduler.active.push(next);
                    }
                    Err(_) => scheduler.queue.push_front(next),
                }
            }
            let idle = scheduler.active.is_empty() && scheduler.queue.is_empty();
            (slot, batch_done, idle)
        };

        let (feed, status) = if slot.aborted {
            (None, LoadStatus::Aborted)
        } else {
            (feed, status)
        };
        tracing::info!(unit, url = %slot.job.url, status = ?status, "Feed load finished");

        let globals = self.global_listeners();
        // An aborted unit was already reported when it was aborted.
        if !slot.aborted {
            for listener in globals.iter().chain(&slot.listeners) {
                listener.on_feed_loaded(feed.as_ref(), status);
            }
        }
        if batch_done {
            for listener in &globals {
                listener.on_update_finished();
            }
        }
        if idle {
            self.idle.notify_waiters();
        }
    }
}

// ============================================================================
// Load manager
// ============================================================================

/// Bounded, coalescing scheduler of feed loads.
///
/// Each request becomes a unit: one fetch through the [`Transport`], parsed
/// as it streams in, optionally followed by an icon fetch and a save to the
/// [`FeedStore`]. Requests for a URL that already has a unit join it.
/// Cloning the manager shares it.
#[derive(Clone)]
pub struct LoadManager {
    inner: Arc<Inner>,
}

impl LoadManager {
    /// Manager for transient loads; nothing is persisted.
    pub fn new(transport: Arc<dyn Transport>, config: LoaderConfig) -> Self {
        Self::build(transport, config, None)
    }

    /// Manager whose loads of stored feeds update `store`.
    pub fn with_store(
        transport: Arc<dyn Transport>,
        config: LoaderConfig,
        store: Arc<Mutex<FeedStore>>,
    ) -> Self {
        Self::build(transport, config, Some(store))
    }

    fn build(
        transport: Arc<dyn Transport>,
        config: LoaderConfig,
        store: Option<Arc<Mutex<FeedStore>>>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                transport,
                store,
                listeners: Mutex::new(Vec::new()),
                scheduler: Mutex::new(Scheduler::default()),
                next_unit: AtomicU64::new(1),
                idle: Notify::new(),
                low_memory: AtomicBool::new(false),
            }),
        }
    }

    pub fn store(&self) -> Option<&Arc<Mutex<FeedStore>>> {
        self.inner.store.as_ref()
    }

    /// Registers a listener for every event of every feed.
    pub fn add_listener(&self, listener: Arc<dyn FeedListener>) {
        lock(&self.inner.listeners).push(listener);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn FeedListener>) {
        lock(&self.inner.listeners).retain(|l| !same_listener(l, listener));
    }

    /// Loads `url`. A URL that belongs to a stored feed updates that feed;
    /// any other URL is parsed into a transient feed.
    pub fn load_feed(
        &self,
        url: &str,
        listener: Option<Arc<dyn FeedListener>>,
    ) -> Result<Admission, LoadError> {
        let parsed = Url::parse(url).map_err(|source| LoadError::InvalidUrl {
            url: url.to_string(),
            source,
        })?;
        let feed_id = self
            .inner
            .store
            .as_ref()
            .and_then(|store| lock(store).find_by_url(parsed.as_str()));
        self.schedule(
            UnitJob {
                url: parsed,
                feed_id,
            },
            listener,
            false,
        )
    }

    /// Refetches a stored feed.
    ///
    /// Within the feed's minimum update interval nothing is fetched: the
    /// listeners get `RefreshPostponed` before this returns.
    pub fn update_feed(
        &self,
        id: FeedId,
        listener: Option<Arc<dyn FeedListener>>,
    ) -> Result<Admission, LoadError> {
        let store = self.inner.store.as_ref().ok_or(LoadError::NoStore)?;
        let (url, resident) = {
            let store = lock(store);
            let stub = store.stub(id).ok_or(LoadError::UnknownFeed(id))?;
            if !stub.is_refresh_postponed(store.settings(), Utc::now()) {
                (Some(stub.url().to_string()), None)
            } else {
                (None, stub.resident())
            }
        };

        let Some(url) = url else {
            tracing::debug!(feed_id = %id, "Update postponed, minimum interval not elapsed");
            let status = LoadStatus::RefreshPostponed;
            for l in self.inner.global_listeners().iter().chain(listener.as_ref()) {
                l.on_feed_loaded(resident.as_ref(), status);
            }
            return Ok(Admission::Finished(status));
        };
        let url = Url::parse(&url).map_err(|source| LoadError::InvalidUrl { url, source })?;
        self.schedule(
            UnitJob {
                url,
                feed_id: Some(id),
            },
            listener,
            false,
        )
    }

    /// Updates every subscribed feed whose update interval elapsed.
    ///
    /// Engine-wide listeners get `on_update_finished` once all of them are
    /// done, right away when none was due. Returns how many were scheduled.
    pub fn update_all(&self) -> Result<usize, LoadError> {
        let store = self.inner.store.as_ref().ok_or(LoadError::NoStore)?;
        let due: Vec<(FeedId, String)> = {
            let store = lock(store);
            store
                .due_for_update(Utc::now())
                .into_iter()
                .filter_map(|id| store.stub(id).map(|s| (id, s.url().to_string())))
                .collect()
        };

        let mut scheduled = 0;
        for (id, url) in due {
            let url = match Url::parse(&url) {
                Ok(url) => url,
                Err(e) => {
                    tracing::warn!(feed_id = %id, url = %url, error = %e, "Skipping feed with invalid URL");
                    continue;
                }
            };
            self.schedule(UnitJob { url, feed_id: Some(id) }, None, true)?;
            scheduled += 1;
        }

        if scheduled == 0 {
            for listener in self.inner.global_listeners() {
                listener.on_update_finished();
            }
        }
        tracing::info!(feeds = scheduled, "Update of due feeds scheduled");
        Ok(scheduled)
    }

    fn schedule(
        &self,
        job: UnitJob,
        listener: Option<Arc<dyn FeedListener>>,
        in_batch: bool,
    ) -> Result<Admission, LoadError> {
        let runtime = Handle::try_current().map_err(|_| LoadError::NoRuntime)?;
        let mut scheduler = lock(&self.inner.scheduler);
        let scheduler = &mut *scheduler;

        let existing = scheduler
            .active
            .iter_mut()
            .chain(scheduler.queue.iter_mut())
            .find(|slot| slot.matches(&job.url));
        if let Some(slot) = existing {
            slot.listeners.extend(listener);
            if in_batch && !slot.in_batch {
                slot.in_batch = true;
                scheduler.batch_remaining += 1;
            }
            tracing::debug!(unit = slot.unit, url = %job.url, "Joined running feed load");
            return Ok(Admission::Joined);
        }

        let slot = Slot {
            unit: self.inner.next_unit.fetch_add(1, Ordering::Relaxed),
            job,
            listeners: listener.into_iter().collect(),
            abort: Arc::new(Notify::new()),
            aborted: false,
            in_batch,
        };
        if in_batch {
            scheduler.batch_remaining += 1;
        }

        let limit = self.inner.config.max_concurrent_loads.max(1);
        if scheduler.active.len() < limit {
            self.inner.spawn(&runtime, &slot);
            scheduler.active.push(slot);
            Ok(Admission::Started)
        } else {
            tracing::debug!(unit = slot.unit, url = %slot.job.url, "Feed load queued");
            scheduler.queue.push_back(slot);
            Ok(Admission::Queued)
        }
    }

    /// Cancels every unit loading `url`. Returns how many were cancelled.
    pub fn abort_loading(&self, url: &str) -> usize {
        match Url::parse(url) {
            Ok(url) => self.abort_where(|slot| slot.job.url == url),
            Err(_) => 0,
        }
    }

    /// Cancels all active and queued units.
    pub fn abort_all(&self) -> usize {
        self.abort_where(|_| true)
    }

    // Queued units vanish at once; active ones are reported Aborted now and
    // stop at their next suspension point.
    fn abort_where(&self, mut matches: impl FnMut(&Slot) -> bool) -> usize {
        let mut detached: Vec<Vec<Arc<dyn FeedListener>>> = Vec::new();
        let mut cancelled: Vec<Slot> = Vec::new();
        let mut batch_done = false;
        let (aborted, idle) = {
            let mut scheduler = lock(&self.inner.scheduler);
            let scheduler = &mut *scheduler;
            let mut aborted = 0;
            for slot in scheduler.active.iter_mut().filter(|s| !s.aborted) {
                if matches(slot) {
                    slot.aborted = true;
                    detached.push(std::mem::take(&mut slot.listeners));
                    slot.abort.notify_one();
                    aborted += 1;
                }
            }

            let (dropped, kept): (VecDeque<Slot>, VecDeque<Slot>) =
                scheduler.queue.drain(..).partition(|slot| matches(slot));
            scheduler.queue = kept;
            for slot in dropped {
                if slot.in_batch {
                    scheduler.batch_remaining = scheduler.batch_remaining.saturating_sub(1);
                    batch_done |= scheduler.batch_remaining == 0;
                }
                cancelled.push(slot);
            }
            let idle = scheduler.active.is_empty() && scheduler.queue.is_empty();
            (aborted, idle)
        };

        let globals = self.inner.global_listeners();
        for listeners in &detached {
            for listener in globals.iter().chain(listeners) {
                listener.on_feed_loaded(None, LoadStatus::Aborted);
            }
        }
        for slot in &cancelled {
            tracing::debug!(unit = slot.unit, url = %slot.job.url, "Queued feed load cancelled");
            for listener in globals.iter().chain(&slot.listeners) {
                listener.on_feed_loaded(None, LoadStatus::Aborted);
            }
        }
        if batch_done {
            for listener in &globals {
                listener.on_update_finished();
            }
        }
        if idle {
            self.inner.idle.notify_waiters();
        }

        let total = aborted + cancelled.len();
        if total > 0 {
            tracing::info!(units = total, "Feed loads aborted");
        }
        total
    }

    pub fn active_count(&self) -> usize {
        lock(&self.inner.scheduler).active.len()
    }

    pub fn queued_count(&self) -> usize {
        lock(&self.inner.scheduler).queue.len()
    }

    pub fn is_idle(&self) -> bool {
        let scheduler = lock(&self.inner.scheduler);
        scheduler.active.is_empty() && scheduler.queue.is_empty()
    }

    /// Set once an icon body could not be buffered.
    pub fn is_low_memory(&self) -> bool {
        self.inner.low_memory.load(Ordering::Relaxed)
    }

    /// Waits until no unit is active or queued.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_idle() {
                return;
            }
            notified.await;
        }
    }
}

fn same_listener(a: &Arc<dyn FeedListener>, b: &Arc<dyn FeedListener>) -> bool {
    // compare data pointers only; vtables may differ between codegen units
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}
