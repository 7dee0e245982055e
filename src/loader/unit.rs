use std::sync::Arc;
use tokio::sync::Notify;
use url::Url;

use super::icon;
use super::manager::Inner;
use super::transport::TransportRequest;
use crate::feed::{FeedParser, ParseObserver};
use crate::model::{EntryId, FeedHandle, FeedId};
use crate::status::LoadStatus;
use crate::util::lock;

/// What one unit loads.
#[derive(Debug, Clone)]
pub(super) struct UnitJob {
    pub url: Url,
    /// Stored feed the result is merged into; `None` for transient loads.
    pub feed_id: Option<FeedId>,
}

/// Forwards parser callbacks to the manager and disarms the load timeout.
struct UnitObserver {
    inner: Arc<Inner>,
    unit: u64,
    progress: Arc<Notify>,
}

impl ParseObserver for UnitObserver {
    fn data_received(&mut self) {
        self.progress.notify_one();
    }

    fn parsing_started(&mut self) {
        self.progress.notify_one();
    }

    fn entry_loaded(&mut self, feed: &FeedHandle, entry: EntryId, is_new: bool) {
        self.inner.notify_entry(self.unit, feed, entry, is_new);
    }
}

/// Body of a unit task. Always ends in `finish_unit`.
pub(super) async fn run(inner: Arc<Inner>, unit: u64, job: UnitJob, abort: Arc<Notify>) {
    let (feed, status) = load(&inner, unit, &job, &abort).await;
    inner.finish_unit(unit, feed, status);
}

async fn load(
    inner: &Arc<Inner>,
    unit: u64,
    job: &UnitJob,
    abort: &Notify,
) -> (Option<FeedHandle>, LoadStatus) {
    let stored = match job.feed_id {
        Some(id) => match stored_feed(inner, id).await {
            Some(handle) => Some(handle),
            None => return (None, LoadStatus::LoadingError),
        },
        None => None,
    };

    let progress = Arc::new(Notify::new());
    let observer = UnitObserver {
        inner: Arc::clone(inner),
        unit,
        progress: Arc::clone(&progress),
    };
    let mut parser = FeedParser::with_observer(Some(job.url.clone()), observer);
    let mut request = TransportRequest::new(job.url.clone());
    if let Some(handle) = stored {
        request.validators = handle.read().validators().clone();
        parser = parser.reuse_feed(handle);
    }

    let status = {
        let transport = Arc::clone(&inner.transport);
        let parse = parser.parse_from(transport.as_ref(), request);
        tokio::pin!(parse);
        let deadline = tokio::time::sleep(inner.config.load_timeout);
        tokio::pin!(deadline);
        let mut waiting = true;

        loop {
            tokio::select! {
                status = &mut parse => break status,
                _ = abort.notified() => break LoadStatus::Aborted,
                _ = progress.notified(), if waiting => waiting = false,
                _ = &mut deadline, if waiting => {
                    tracing::debug!(unit, url = %job.url, "No data before the load timeout");
                    break LoadStatus::ServerTimeout;
                }
            }
        }
    };
    if status == LoadStatus::Aborted {
        return (None, status);
    }
    let feed = parser.feed().cloned();

    if let (Some(id), Some(handle)) = (job.feed_id, feed.as_ref()) {
        if status == LoadStatus::Ok && inner.config.fetch_icons {
            tokio::select! {
                _ = icon::fetch_icon(inner, id, handle) => {}
                _ = abort.notified() => return (None, LoadStatus::Aborted),
            }
        }
        save(inner, id, handle.clone(), status).await;
    }
    (feed, status)
}

async fn stored_feed(inner: &Inner, id: FeedId) -> Option<FeedHandle> {
    let store = Arc::clone(inner.store.as_ref()?);
    let result = tokio::task::spawn_blocking(move || lock(&store).feed(id)).await;
    match result {
        Ok(Ok(handle)) => Some(handle),
        Ok(Err(e)) => {
            tracing::warn!(feed_id = %id, error = %e, "Stored feed unavailable");
            None
        }
        Err(e) => {
            tracing::warn!(feed_id = %id, error = %e, "Feed store task failed");
            None
        }
    }
}

async fn save(inner: &Inner, id: FeedId, handle: FeedHandle, status: LoadStatus) {
    let Some(store) = inner.store.as_ref().map(Arc::clone) else {
        return;
    };
    let result =
        tokio::task::spawn_blocking(move || lock(&store).finish_load(id, Some(&handle), status))
            .await;
    match result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!(feed_id = %id, error = %e, "Failed to save loaded feed"),
        Err(e) => tracing::warn!(feed_id = %id, error = %e, "Feed store task failed"),
    }
}
