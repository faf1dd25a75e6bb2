//! Upstream HTTP fetching with retry, classification, and circuit
//! breaking.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::TryStreamExt;
use reqwest::{Client, StatusCode};
use thiserror::Error;
use tokio::io::AsyncRead;
use tokio_util::io::StreamReader;
use tracing::{debug, warn};
use url::Url;

mod breaker;

pub use breaker::{BreakerConfig, CircuitBreaker};

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("not found upstream")]
    NotFound,

    #[error("upstream rate limited")]
    RateLimited,

    #[error("upstream down (status {status})")]
    UpstreamDown { status: u16 },

    #[error("upstream rejected request (status {status})")]
    Denied { status: u16 },

    #[error("circuit open for host {host}")]
    CircuitOpen { host: String },

    #[error("invalid upstream url: {0}")]
    BadUrl(String),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

impl FetchError {
    /// Only rate limiting and 5xx responses are worth another attempt.
    fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited | Self::UpstreamDown { .. })
    }
}

/// A successfully opened upstream body.
pub struct RemoteArtifact {
    pub body: Box<dyn AsyncRead + Send + Unpin>,
    pub size: Option<u64>,
    pub content_type: Option<String>,
    pub etag: Option<String>,
}

impl std::fmt::Debug for RemoteArtifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteArtifact")
            .field("size", &self.size)
            .field("content_type", &self.content_type)
            .finish()
    }
}

/// Maps an upstream URL to an optional header applied to each request.
pub trait AuthResolver: Send + Sync {
    fn resolve(&self, url: &Url) -> Option<(String, String)>;
}

#[derive(Debug, Default)]
pub struct NoAuth;

impl AuthResolver for NoAuth {
    fn resolve(&self, _url: &Url) -> Option<(String, String)> {
        None
    }
}

/// Host-keyed static headers, e.g. a bearer token per private registry.
#[derive(Debug, Default)]
pub struct StaticAuth {
    headers: HashMap<String, (String, String)>,
}

impl StaticAuth {
    pub fn new(headers: HashMap<String, (String, String)>) -> Self {
        Self { headers }
    }
}

impl AuthResolver for StaticAuth {
    fn resolve(&self, url: &Url) -> Option<(String, String)> {
        url.host_str()
            .and_then(|host| self.headers.get(host).cloned())
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub attempts: u32,
    /// Backoff base; attempt `n` sleeps `base * 2^(n-1)`.
    pub base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 4,
            base: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    fn delay(&self, attempt: u32) -> Duration {
        self.base * 2u32.saturating_pow(attempt.saturating_sub(1))
    }
}

pub struct Fetcher {
    client: Client,
    auth: Arc<dyn AuthResolver>,
    retry: RetryPolicy,
    breaker: CircuitBreaker,
}

impl std::fmt::Debug for Fetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fetcher").field("retry", &self.retry).finish()
    }
}

enum Classified {
    Ok(reqwest::Response),
    Err(FetchError),
}

fn classify(resp: reqwest::Response) -> Classified {
    let status = resp.status();
    if status.is_success() {
        return Classified::Ok(resp);
    }
    Classified::Err(match status {
        StatusCode::NOT_FOUND => FetchError::NotFound,
        StatusCode::TOO_MANY_REQUESTS => FetchError::RateLimited,
        s if s.is_server_error() => FetchError::UpstreamDown { status: s.as_u16() },
        s => FetchError::Denied { status: s.as_u16() },
    })
}

impl Fetcher {
    pub fn new(
        retry: RetryPolicy,
        breaker: BreakerConfig,
        auth: Arc<dyn AuthResolver>,
    ) -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(crate::USER_AGENT)
            .build()?;
        Ok(Self {
            client,
            auth,
            retry,
            breaker: CircuitBreaker::new(breaker),
        })
    }

    async fn request(&self, url: &Url, head: bool) -> Result<reqwest::Response, FetchError> {
        let mut req = if head {
            self.client.head(url.clone())
        } else {
            self.client.get(url.clone())
        };
        if let Some((name, value)) = self.auth.resolve(url) {
            req = req.header(name, value);
        }
        Ok(req.send().await?)
    }

    /// One classified attempt, with breaker admission and bookkeeping.
    async fn attempt(&self, url: &Url, host: &str, head: bool) -> Result<reqwest::Response, FetchError> {
        self.breaker.admit(host)?;
        let resp = match self.request(url, head).await {
            Ok(resp) => resp,
            // Transport failures are returned verbatim; the breaker only
            // counts classified upstream outcomes.
            Err(e) => return Err(e),
        };
        match classify(resp) {
            Classified::Ok(resp) => {
                self.breaker.record_success(host);
                Ok(resp)
            }
            Classified::Err(err) => {
                match err {
                    FetchError::RateLimited | FetchError::UpstreamDown { .. } => {
                        self.breaker.record_failure(host)
                    }
                    _ => self.breaker.record_success(host),
                }
                Err(err)
            }
        }
    }

    /// GET `url`, streaming the body. Retries rate limits and 5xx with
    /// exponential backoff; 404, transport errors, and other 4xx return
    /// immediately.
    pub async fn fetch(&self, url: &str) -> Result<RemoteArtifact, FetchError> {
        let parsed = Url::parse(url).map_err(|_| FetchError::BadUrl(url.to_string()))?;
        let host = parsed.host_str().unwrap_or_default().to_string();

        let mut attempt = 1;
        let resp = loop {
            match self.attempt(&parsed, &host, false).await {
                Ok(resp) => break resp,
                Err(err) if err.is_retryable() && attempt < self.retry.attempts => {
                    let delay = self.retry.delay(attempt);
                    debug!(url, attempt, ?delay, error = %err, "retrying upstream fetch");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    warn!(url, attempt, error = %err, "upstream fetch failed");
                    return Err(err);
                }
            }
        };

        let size = resp.content_length();
        let content_type = header_string(&resp, reqwest::header::CONTENT_TYPE);
        let etag = header_string(&resp, reqwest::header::ETAG);
        let stream = Box::pin(resp.bytes_stream().map_err(std::io::Error::other));

        Ok(RemoteArtifact {
            body: Box::new(StreamReader::new(stream)),
            size,
            content_type,
            etag,
        })
    }

    /// HEAD `url`. Same classification as [`fetch`](Self::fetch), never
    /// retried.
    pub async fn head(&self, url: &str) -> Result<(Option<u64>, Option<String>), FetchError> {
        let parsed = Url::parse(url).map_err(|_| FetchError::BadUrl(url.to_string()))?;
        let host = parsed.host_str().unwrap_or_default().to_string();
        let resp = self.attempt(&parsed, &host, true).await?;
        let content_type = header_string(&resp, reqwest::header::CONTENT_TYPE);
        Ok((resp.content_length(), content_type))
    }
}

fn header_string(resp: &reqwest::Response, name: reqwest::header::HeaderName) -> Option<String> {
    resp.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use tokio::io::AsyncReadExt;

    use super::*;

    fn fetcher(attempts: u32, threshold: u32) -> Fetcher {
        Fetcher::new(
            RetryPolicy {
                attempts,
                base: Duration::from_millis(1),
            },
            BreakerConfig {
                threshold,
                window: Duration::from_secs(60),
                cooldown: Duration::from_secs(30),
            },
            Arc::new(NoAuth),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_fetch_success_streams_body() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/left-pad/-/left-pad-1.3.0.tgz")
            .with_status(200)
            .with_header("content-type", "application/gzip")
            .with_body("tarball bytes")
            .create_async()
            .await;

        let f = fetcher(4, 5);
        let url = format!("{}/left-pad/-/left-pad-1.3.0.tgz", server.url());
        let mut artifact = f.fetch(&url).await.unwrap();

        let mut body = Vec::new();
        artifact.body.read_to_end(&mut body).await.unwrap();
        assert_eq!(body, b"tarball bytes");
        assert_eq!(artifact.content_type.as_deref(), Some("application/gzip"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_404_does_not_retry() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/missing.tgz")
            .with_status(404)
            .expect(1)
            .create_async()
            .await;

        let f = fetcher(4, 5);
        let err = f.fetch(&format!("{}/missing.tgz", server.url())).await.unwrap_err();
        assert!(matches!(err, FetchError::NotFound));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_5xx_retries_until_exhausted() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/flaky.tgz")
            .with_status(502)
            .expect(3)
            .create_async()
            .await;

        let f = fetcher(3, 100);
        let err = f.fetch(&format!("{}/flaky.tgz", server.url())).await.unwrap_err();
        assert!(matches!(err, FetchError::UpstreamDown { status: 502 }));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_recovers_within_retry_budget() {
        let mut server = mockito::Server::new_async().await;
        let fail = server
            .mock("GET", "/eventually.tgz")
            .with_status(503)
            .expect(1)
            .create_async()
            .await;

        // A wider backoff so the mock swap below lands between attempts.
        let f = Fetcher::new(
            RetryPolicy {
                attempts: 4,
                base: Duration::from_millis(50),
            },
            BreakerConfig::default(),
            Arc::new(NoAuth),
        )
        .unwrap();
        let url = format!("{}/eventually.tgz", server.url());
        let handle = tokio::spawn(async move { f.fetch(&url).await });

        // Swap the mock to success once the first attempt has landed.
        fail.assert_async().await;
        let ok = server
            .mock("GET", "/eventually.tgz")
            .with_status(200)
            .with_body("ok")
            .create_async()
            .await;

        let artifact = handle.await.unwrap().unwrap();
        assert!(artifact.size.is_some());
        ok.assert_async().await;
    }

    #[tokio::test]
    async fn test_other_4xx_is_denied() {
        let mut server = mockito::Server::new_async().await;
        let _mock1 = server
            .mock("GET", "/forbidden.tgz")
            .with_status(403)
            .expect(1)
            .create_async()
            .await;

        let f = fetcher(4, 5);
        let err = f
            .fetch(&format!("{}/forbidden.tgz", server.url()))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Denied { status: 403 }));
    }

    #[tokio::test]
    async fn test_breaker_fails_fast_without_network() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/down.tgz")
            .with_status(502)
            .expect(2)
            .create_async()
            .await;

        let f = fetcher(1, 2);
        let url = format!("{}/down.tgz", server.url());
        for _ in 0..2 {
            let err = f.fetch(&url).await.unwrap_err();
            assert!(matches!(err, FetchError::UpstreamDown { .. }));
        }

        let start = Instant::now();
        let err = f.fetch(&url).await.unwrap_err();
        assert!(matches!(err, FetchError::CircuitOpen { .. }));
        assert!(start.elapsed() < Duration::from_millis(10));
        // The third request never reached the server.
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_head_classifies_without_retry() {
        let mut server = mockito::Server::new_async().await;
        let _mock2 = server
            .mock("HEAD", "/head.tgz")
            .with_status(503)
            .expect(1)
            .create_async()
            .await;

        let f = fetcher(4, 100);
        let err = f.head(&format!("{}/head.tgz", server.url())).await.unwrap_err();
        assert!(matches!(err, FetchError::UpstreamDown { status: 503 }));
    }
}
