use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::header::{HeaderMap, HeaderValue, ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED, LOCATION};
use reqwest::redirect::Policy;
use reqwest::StatusCode;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::model::HttpValidators;

const MAX_REDIRECTS: usize = 5;
const MAX_FEED_SIZE: usize = 10 * 1024 * 1024; // 10MB

#[derive(Debug, Error)]
pub enum TransportError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Response too large")]
    TooLarge,

    #[error("Too many redirects (max {0})")]
    TooManyRedirects(usize),

    #[error("Invalid redirect target '{0}'")]
    BadRedirect(String),

    /// Failure reported by a non-HTTP transport.
    #[error("Transport unavailable: {0}")]
    Unavailable(String),
}

/// What to fetch, with the validators of the stored copy.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub url: Url,
    pub validators: HttpValidators,
}

impl TransportRequest {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            validators: HttpValidators::default(),
        }
    }

    pub fn with_validators(mut self, validators: HttpValidators) -> Self {
        self.validators = validators;
        self
    }
}

/// Response head plus a body that is consumed chunk by chunk.
pub struct TransportResponse {
    pub status: u16,
    /// URL the body was served from, after redirects.
    pub final_url: Url,
    /// Set when every redirect hop was permanent.
    pub permanent_redirect: Option<Url>,
    pub validators: HttpValidators,
    pub body: BoxStream<'static, Result<Vec<u8>, TransportError>>,
}

impl TransportResponse {
    /// A complete response whose body arrives in the given chunks.
    pub fn from_chunks(status: u16, final_url: Url, chunks: Vec<Vec<u8>>) -> Self {
        Self {
            status,
            final_url,
            permanent_redirect: None,
            validators: HttpValidators::default(),
            body: stream::iter(chunks.into_iter().map(Ok)).boxed(),
        }
    }
}

impl fmt::Debug for TransportResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportResponse")
            .field("status", &self.status)
            .field("final_url", &self.final_url.as_str())
            .field("permanent_redirect", &self.permanent_redirect)
            .field("validators", &self.validators)
            .finish_non_exhaustive()
    }
}

/// Fetches documents for the loader.
///
/// Implementations follow redirects themselves and report non-success
/// statuses in the response rather than as errors.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn load(&self, request: TransportRequest) -> Result<TransportResponse, TransportError>;
}

/// [`Transport`] over `reqwest`.
pub struct HttpTransport {
    client: reqwest::Client,
    max_body: usize,
}

impl HttpTransport {
    pub fn new(user_agent: &str) -> Result<Self, TransportError> {
        // Redirects are followed by hand to tell permanent moves apart
        let client = reqwest::Client::builder()
            .redirect(Policy::none())
            .user_agent(user_agent)
            .pool_max_idle_per_host(4)
            .pool_idle_timeout(Duration::from_secs(30))
            .tcp_keepalive(Duration::from_secs(60))
            .connect_timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self::with_client(client))
    }

    /// Uses `client` as-is; it should not follow redirects on its own.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client,
            max_body: MAX_FEED_SIZE,
        }
    }

    pub fn with_max_body(mut self, max_body: usize) -> Self {
        self.max_body = max_body;
        self
    }
}

fn conditional_headers(validators: &HttpValidators) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Some(etag) = &validators.etag {
        if let Ok(value) = HeaderValue::from_str(etag) {
            headers.insert(IF_NONE_MATCH, value);
        }
    }
    if let Some(last_modified) = &validators.last_modified {
        if let Ok(value) = HeaderValue::from_str(last_modified) {
            headers.insert(IF_MODIFIED_SINCE, value);
        }
    }
    headers
}

fn header_string(headers: &HeaderMap, name: reqwest::header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(String::from)
}

#[async_trait]
impl Transport for HttpTransport {
    async fn load(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        let headers = conditional_headers(&request.validators);
        let mut url = request.url;
        let mut hops = 0;
        let mut permanent = true;

        let response = loop {
            let response = self
                .client
                .get(url.clone())
                .headers(headers.clone())
                .send()
                .await?;
            let status = response.status();
            if !status.is_redirection() || status == StatusCode::NOT_MODIFIED {
                break response;
            }
            let Some(location) = response
                .headers()
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
            else {
                break response;
            };

            hops += 1;
            if hops > MAX_REDIRECTS {
                return Err(TransportError::TooManyRedirects(MAX_REDIRECTS));
            }
            let next = url
                .join(location)
                .map_err(|_| TransportError::BadRedirect(location.to_string()))?;
            permanent &= matches!(
                status,
                StatusCode::MOVED_PERMANENTLY | StatusCode::PERMANENT_REDIRECT
            );
            tracing::debug!(from = %url, to = %next, hop = hops, status = %status, "Following redirect");
            url = next;
        };

        if let Some(len) = response.content_length() {
            if len > self.max_body as u64 {
                return Err(TransportError::TooLarge);
            }
        }

        let validators = HttpValidators {
            etag: header_string(response.headers(), ETAG),
            last_modified: header_string(response.headers(), LAST_MODIFIED),
        };
        let status = response.status().as_u16();
        let permanent_redirect = (hops > 0 && permanent).then(|| url.clone());

        let limit = self.max_body;
        let mut received = 0usize;
        let body = response
            .bytes_stream()
            .map(move |chunk| -> Result<Vec<u8>, TransportError> {
                let chunk = chunk?;
                received = received.saturating_add(chunk.len());
                if received > limit {
                    return Err(TransportError::TooLarge);
                }
                Ok(chunk.to_vec())
            })
            .boxed();

        Ok(TransportResponse {
            status,
            final_url: url,
            permanent_redirect,
            validators,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn body_of(response: TransportResponse) -> Result<Vec<u8>, TransportError> {
        let mut body = response.body;
        let mut bytes = Vec::new();
        while let Some(chunk) = body.next().await {
            bytes.extend(chunk?);
        }
        Ok(bytes)
    }

    fn transport() -> HttpTransport {
        HttpTransport::new("feedengine-test").unwrap()
    }

    #[tokio::test]
    async fn test_success_carries_validators() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feed"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("<rss/>")
                    .insert_header("ETag", "\"abc\"")
                    .insert_header("Last-Modified", "Wed, 01 May 2024 10:00:00 GMT"),
            )
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/feed", server.uri())).unwrap();
        let response = transport().load(TransportRequest::new(url)).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.validators.etag.as_deref(), Some("\"abc\""));
        assert!(response.permanent_redirect.is_none());
        assert_eq!(body_of(response).await.unwrap(), b"<rss/>");
    }

    #[tokio::test]
    async fn test_sends_conditional_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("If-None-Match", "\"abc\""))
            .respond_with(ResponseTemplate::new(304))
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/feed", server.uri())).unwrap();
        let request = TransportRequest::new(url).with_validators(HttpValidators {
            etag: Some("\"abc\"".into()),
            last_modified: None,
        });
        let response = transport().load(request).await.unwrap();
        assert_eq!(response.status, 304);
    }

    #[tokio::test]
    async fn test_permanent_redirect_reported() {
        let server = MockServer::start().await;
        Mock::given(path("/old"))
            .respond_with(ResponseTemplate::new(301).insert_header("Location", "/new"))
            .mount(&server)
            .await;
        Mock::given(path("/new"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<rss/>"))
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/old", server.uri())).unwrap();
        let response = transport().load(TransportRequest::new(url)).await.unwrap();
        let expected = format!("{}/new", server.uri());
        assert_eq!(response.final_url.as_str(), expected);
        assert_eq!(response.permanent_redirect.map(|u| u.to_string()), Some(expected));
    }

    #[tokio::test]
    async fn test_mixed_redirect_chain_is_not_permanent() {
        let server = MockServer::start().await;
        Mock::given(path("/a"))
            .respond_with(ResponseTemplate::new(301).insert_header("Location", "/b"))
            .mount(&server)
            .await;
        Mock::given(path("/b"))
            .respond_with(ResponseTemplate::new(302).insert_header("Location", "/c"))
            .mount(&server)
            .await;
        Mock::given(path("/c"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/a", server.uri())).unwrap();
        let response = transport().load(TransportRequest::new(url)).await.unwrap();
        assert!(response.final_url.as_str().ends_with("/c"));
        assert!(response.permanent_redirect.is_none());
    }

    #[tokio::test]
    async fn test_redirect_loop_gives_up() {
        let server = MockServer::start().await;
        Mock::given(path("/loop"))
            .respond_with(ResponseTemplate::new(302).insert_header("Location", "/loop"))
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/loop", server.uri())).unwrap();
        let result = transport().load(TransportRequest::new(url)).await;
        assert!(matches!(result, Err(TransportError::TooManyRedirects(5))));
    }

    #[tokio::test]
    async fn test_oversized_body_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("x".repeat(64)))
            .mount(&server)
            .await;

        let url = Url::parse(&server.uri()).unwrap();
        let result = transport()
            .with_max_body(16)
            .load(TransportRequest::new(url))
            .await;
        assert!(matches!(result, Err(TransportError::TooLarge)));
    }
}
