//! Best-effort icon fetch after a successful feed load.
//!
//! Tries the icon the feed declares, then `/favicon.ico` of the feed's site.
//! Nothing here can change the status of the load that triggered it.

use futures::StreamExt;
use std::sync::Arc;
use url::Url;

use super::manager::Inner;
use super::transport::TransportRequest;
use crate::model::{FeedHandle, FeedId};
use crate::util::{favicon_url, lock, resolve};

const MAX_ICON_SIZE: usize = 512 * 1024;

enum IconError {
    Unavailable(String),
    OutOfMemory,
}

fn candidates(feed: &FeedHandle) -> Vec<Url> {
    let feed = feed.read();
    let site = Url::parse(feed.url()).ok();
    let mut urls = Vec::new();
    if let Some(declared) = feed.icon().and_then(|icon| resolve(site.as_ref(), icon)) {
        urls.push(declared);
    }
    let page = resolve(site.as_ref(), &feed.link().uri).or(site);
    if let Some(favicon) = page.as_ref().and_then(favicon_url) {
        if !urls.contains(&favicon) {
            urls.push(favicon);
        }
    }
    urls
}

/// Extension the icon is stored under, from the URL path.
fn extension(url: &Url) -> &'static str {
    let path = url.path().to_ascii_lowercase();
    ["png", "gif", "jpg", "jpeg", "svg", "webp"]
        .into_iter()
        .find(|ext| path.ends_with(&format!(".{ext}")))
        .unwrap_or("ico")
}

async fn download(inner: &Inner, url: &Url) -> Result<Vec<u8>, IconError> {
    let response = inner
        .transport
        .load(TransportRequest::new(url.clone()))
        .await
        .map_err(|e| IconError::Unavailable(e.to_string()))?;
    if !(200..300).contains(&response.status) {
        return Err(IconError::Unavailable(format!("HTTP {}", response.status)));
    }

    let mut body = response.body;
    let mut bytes: Vec<u8> = Vec::new();
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|e| IconError::Unavailable(e.to_string()))?;
        if bytes.len().saturating_add(chunk.len()) > MAX_ICON_SIZE {
            return Err(IconError::Unavailable("icon too large".to_string()));
        }
        bytes.try_reserve(chunk.len()).map_err(|_| IconError::OutOfMemory)?;
        bytes.extend_from_slice(&chunk);
    }
    if bytes.is_empty() {
        return Err(IconError::Unavailable("empty body".to_string()));
    }
    Ok(bytes)
}

/// Fetches and stores an icon for `feed`, giving up after `icon_timeout`.
pub(super) async fn fetch_icon(inner: &Inner, id: FeedId, feed: &FeedHandle) {
    let Some(store) = inner.store.as_ref().map(Arc::clone) else {
        return;
    };
    for url in candidates(feed) {
        let bytes = match tokio::time::timeout(inner.config.icon_timeout, download(inner, &url)).await {
            Ok(Ok(bytes)) => bytes,
            Ok(Err(IconError::OutOfMemory)) => {
                inner.set_low_memory();
                return;
            }
            Ok(Err(IconError::Unavailable(reason))) => {
                tracing::debug!(feed_id = %id, url = %url, reason = %reason, "Icon not available");
                continue;
            }
            Err(_) => {
                tracing::warn!(feed_id = %id, url = %url, "Icon fetch timed out");
                continue;
            }
        };

        let ext = extension(&url);
        let store = Arc::clone(&store);
        let stored =
            tokio::task::spawn_blocking(move || lock(&store).store_icon(id, &bytes, ext)).await;
        match stored {
            Ok(Ok(())) => return,
            Ok(Err(e)) => tracing::warn!(feed_id = %id, error = %e, "Failed to store feed icon"),
            Err(e) => tracing::warn!(feed_id = %id, error = %e, "Feed store task failed"),
        }
        return;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Feed, FeedId};

    #[test]
    fn test_declared_icon_comes_first() {
        let mut feed = Feed::new(FeedId(1), "http://example.com/feeds/rss.xml");
        feed.set_icon(Some("/img/logo.png".into()));
        feed.link_mut().uri = "http://blog.example.com/".into();
        let urls: Vec<String> = candidates(&FeedHandle::new(feed))
            .iter()
            .map(Url::to_string)
            .collect();
        assert_eq!(
            urls,
            vec![
                "http://example.com/img/logo.png",
                "http://blog.example.com/favicon.ico"
            ]
        );
    }

    #[test]
    fn test_favicon_from_feed_url_without_site_link() {
        let feed = Feed::new(FeedId(1), "https://example.org/rss");
        let urls = candidates(&FeedHandle::new(feed));
        assert_eq!(urls.len(), 1);
        assert_eq!(urls[0].as_str(), "https://example.org/favicon.ico");
    }

    #[test]
    fn test_extension_from_path() {
        let png = Url::parse("http://example.com/a/logo.PNG").unwrap();
        let bare = Url::parse("http://example.com/favicon").unwrap();
        assert_eq!(extension(&png), "png");
        assert_eq!(extension(&bare), "ico");
    }
}
