//! Page retrieval shared by every adapter.
//!
//! Adapters never talk to `reqwest` directly: they go through a
//! [`PageFetcher`] so the transport can be pooled across adapters and
//! replaced by canned pages in tests.

use async_trait::async_trait;
use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use castlefinder_shared::{CastleFinderError, HttpConfig, Result};

/// Fetches the body of a page by URL.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Return the response body of `url`.
    ///
    /// Resolves to [`CastleFinderError::Cancelled`] as soon as `cancel`
    /// fires, and to [`CastleFinderError::Fetch`] for transport failures
    /// or non-2xx responses.
    async fn fetch(&self, cancel: &CancellationToken, url: &str) -> Result<String>;
}

// ---------------------------------------------------------------------------
// HttpFetcher
// ---------------------------------------------------------------------------

/// [`PageFetcher`] backed by one pooled `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// Build the shared client from the `[http]` config section.
    pub fn new(config: &HttpConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(config.timeout())
            .pool_max_idle_per_host(config.max_idle_per_host)
            .build()
            .map_err(|e| CastleFinderError::config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client })
    }

    async fn get(&self, url: &str) -> Result<String> {
        debug!(%url, "fetching page");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| CastleFinderError::fetch(url, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CastleFinderError::fetch(url, format!("HTTP {status}")));
        }

        response
            .text()
            .await
            .map_err(|e| CastleFinderError::fetch(url, format!("body read failed: {e}")))
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, cancel: &CancellationToken, url: &str) -> Result<String> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(CastleFinderError::Cancelled),
            body = self.get(url) => body,
        }
    }
}
