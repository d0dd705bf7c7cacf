//! Remote product feed client.
//!
//! One HTTP GET per attempt against the configured endpoint. Transport
//! failures, non-2xx statuses, malformed payloads and the payload-level
//! `error` flag all consume an attempt; once the attempt budget is spent the
//! fetch fails terminally and the whole sync pass is aborted upstream.

use indexmap::IndexMap;
use rand::{thread_rng, Rng};
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tokio::time::{sleep, Duration};
use tracing::warn;

use crate::config::SyncConfig;

/// A product record as delivered by the feed. Price arrives as a display
/// string (currency symbols and all); normalization is the reconciler's job.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct RemoteProduct {
    pub sku: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub price: String,
    #[serde(default)]
    pub in_stock: i64,
    #[serde(default)]
    pub picture: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FeedPayload {
    #[serde(default)]
    error: bool,
    #[serde(default)]
    data: Vec<RemoteProduct>,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("feed request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("feed returned HTTP {0}")]
    Status(reqwest::StatusCode),
    #[error("malformed feed payload: {0}")]
    Malformed(String),
    #[error("feed payload has error flag set")]
    RemoteFlag,
    #[error("feed fetch failed after {attempts} attempt(s): {last}")]
    Exhausted { attempts: u32, last: String },
}

#[derive(Debug, Clone)]
pub struct FeedClient {
    endpoint: String,
    max_attempts: u32,
    backoff_ms: u64,
    http: Client,
}

impl FeedClient {
    pub fn new(config: &SyncConfig) -> Result<Self, FetchError> {
        let http = Client::builder()
            .user_agent("feedsync/0.1")
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .build()?;
        Ok(Self {
            endpoint: config.feed_url.clone(),
            max_attempts: config.max_fetch_attempts.max(1),
            backoff_ms: config.fetch_backoff_ms,
            http,
        })
    }

    /// Fetch the full remote product list.
    ///
    /// Bounded retry loop with jittered exponential backoff; the last
    /// attempt's error is carried inside the terminal `Exhausted` variant.
    pub async fn fetch(&self) -> Result<Vec<RemoteProduct>, FetchError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.fetch_once().await {
                Ok(products) => return Ok(products),
                Err(err) => {
                    if attempt >= self.max_attempts {
                        return Err(FetchError::Exhausted {
                            attempts: attempt,
                            last: err.to_string(),
                        });
                    }
                    warn!(attempt, error = %err, "feed fetch attempt failed; retrying");
                    let delay = backoff_with_jitter(self.backoff_ms, attempt);
                    sleep(Duration::from_millis(delay)).await;
                }
            }
        }
    }

    async fn fetch_once(&self) -> Result<Vec<RemoteProduct>, FetchError> {
        let resp = self.http.get(&self.endpoint).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status(status));
        }
        let body = resp.text().await?;
        let payload = decode_payload(&body)?;
        Ok(payload)
    }
}

/// Exponential backoff with up to 50% random jitter, capped at 2^8 times the
/// base. Saturating throughout so an extreme configured base cannot overflow.
fn backoff_with_jitter(backoff_ms: u64, attempt: u32) -> u64 {
    let base = backoff_ms.saturating_mul(1u64 << attempt.saturating_sub(1).min(8));
    let jitter = if base > 0 {
        thread_rng().gen_range(0..=base / 2)
    } else {
        0
    };
    base.saturating_add(jitter)
}

fn decode_payload(body: &str) -> Result<Vec<RemoteProduct>, FetchError> {
    let payload: FeedPayload =
        serde_json::from_str(body).map_err(|e| FetchError::Malformed(e.to_string()))?;
    if payload.error {
        return Err(FetchError::RemoteFlag);
    }
    Ok(payload.data)
}

/// Fold the feed list into a SKU-keyed snapshot. The feed is not guaranteed
/// to be duplicate-free; when a SKU repeats, the last entry wins.
pub fn snapshot(products: Vec<RemoteProduct>) -> IndexMap<String, RemoteProduct> {
    let mut map = IndexMap::with_capacity(products.len());
    for product in products {
        map.insert(product.sku.clone(), product);
    }
    map
}
