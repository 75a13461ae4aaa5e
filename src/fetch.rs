//! Bounded-timeout HTTP fetching for manifests and subtitle segments.
//!
//! The polling loop talks to the network only through the [`Fetcher`]
//! trait. [`HttpFetcher`] is the `reqwest` implementation; tests drive the
//! loop with scripted fetchers instead.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use thiserror::Error;
use tracing::{debug, instrument};

/// A single failed GET. Carries the URL so callers can log what was skipped.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("failed to fetch {url}: {reason}")]
pub struct FetchError {
    pub url: String,
    pub reason: String,
}

impl FetchError {
    pub fn new(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reason: reason.into(),
        }
    }
}

/// Performs one GET with the given timeout. Implementations never retry.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<Bytes, FetchError>;
}

/// `reqwest`-backed fetcher sharing one pooled client across all requests.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, FetchError> {
        let client = Client::builder()
            // Playlists are re-polled every few seconds from the same host
            .pool_max_idle_per_host(4)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_nodelay(true)
            .use_rustls_tls()
            .gzip(true)
            .brotli(true)
            .redirect(reqwest::redirect::Policy::limited(10))
            .user_agent(concat!("substream/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FetchError::new("", format!("client build failed: {e}")))?;

        Ok(Self { client })
    }

    /// Wrap an existing client, e.g. one configured with proxies or headers.
    #[must_use]
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    #[instrument(skip(self), fields(url = %url))]
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<Bytes, FetchError> {
        let resp = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| FetchError::new(url, describe(&e)))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::new(url, format!("status {status}")));
        }

        let body = resp
            .bytes()
            .await
            .map_err(|e| FetchError::new(url, describe(&e)))?;
        debug!(bytes = body.len(), "fetched");
        Ok(body)
    }
}

fn describe(err: &reqwest::Error) -> String {
    if err.is_timeout() {
        "timed out".to_string()
    } else if err.is_connect() {
        format!("connect error: {err}")
    } else {
        err.to_string()
    }
}
