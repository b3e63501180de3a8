// 🌐 Pack Fetcher - network side of the offline cache
// http(s) locations go through reqwest; anything else is read from disk.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::error::{Error, Result};

/// Fetch a structured document (a pack, the park registry) from a location.
///
/// One shot: no retry, a timeout is just another failure.
#[async_trait]
pub trait PackFetcher: Send + Sync {
    async fn fetch_json(&self, location: &str) -> Result<Value>;
}

pub fn is_remote(location: &str) -> bool {
    let lower = location.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// reqwest for `http(s)://`, filesystem for paths and `file://`
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("trackerid/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    async fn fetch_remote(&self, location: &str) -> Result<Value> {
        let fail = |reason: String| Error::Fetch {
            location: location.to_string(),
            reason,
        };

        // Bypass intermediary caches: the local store is the cache
        let response = self
            .client
            .get(location)
            .header(reqwest::header::CACHE_CONTROL, "no-store")
            .send()
            .await
            .map_err(|e| fail(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(fail(format!("HTTP {}", status.as_u16())));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| fail(format!("invalid JSON body: {}", e)))
    }

    async fn fetch_local(&self, location: &str) -> Result<Value> {
        let path = PathBuf::from(location.strip_prefix("file://").unwrap_or(location));
        let text = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| Error::Fetch {
                location: location.to_string(),
                reason: e.to_string(),
            })?;

        serde_json::from_str(&text).map_err(|e| Error::Fetch {
            location: location.to_string(),
            reason: format!("invalid JSON body: {}", e),
        })
    }
}

#[async_trait]
impl PackFetcher for HttpFetcher {
    async fn fetch_json(&self, location: &str) -> Result<Value> {
        debug!(location, "fetching");
        if is_remote(location) {
            self.fetch_remote(location).await
        } else {
            self.fetch_local(location).await
        }
    }
}

/// Always fails. Used for `--offline` runs.
pub struct OfflineFetcher;

#[async_trait]
impl PackFetcher for OfflineFetcher {
    async fn fetch_json(&self, location: &str) -> Result<Value> {
        Err(Error::Fetch {
            location: location.to_string(),
            reason: "offline".to_string(),
        })
    }
}
