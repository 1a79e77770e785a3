//! Remote feed service contract.
//!
//! The service that scores headlines lives elsewhere; this module only
//! describes what the sync engine asks of it:
//!
//! - [`RemoteFeedService`] - the async trait the coordinator and reader
//!   depend on
//! - [`HttpFeedClient`] - the production implementation over HTTP/JSON
//!
//! Every call returns a [`RemoteError`] on failure. Callers treat all
//! variants the same way: leave local state alone and retry later.

mod http;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer};
use thiserror::Error;

use crate::storage::{LiveFeedEntry, NewHeadline, Sentiment};

pub use http::HttpFeedClient;

/// Errors from the remote feed service.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// Request exceeded the configured timeout
    #[error("Request timed out")]
    Timeout,
    /// Non-2xx response; `message` comes from the body's `error` field when present
    #[error("Server returned {status}: {message}")]
    Server { status: u16, message: String },
    /// Response body was not the expected JSON shape
    #[error("Invalid response: {0}")]
    Decode(String),
    /// Response body exceeded the size cap
    #[error("Response too large")]
    ResponseTooLarge,
    /// Configured base URL cannot be used
    #[error("Invalid API base URL: {0}")]
    InvalidBaseUrl(String),
}

// ============================================================================
// Response Types
// ============================================================================

/// Answer to "is there a generation newer than my cursor?"
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCheck {
    pub has_update: bool,
    #[serde(default)]
    pub latest_update_id: Option<String>,
}

/// Full snapshot of one generation.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkUpdate {
    #[serde(default)]
    pub update_id: Option<String>,
    #[serde(default, deserialize_with = "scored_headlines")]
    pub headlines: Vec<NewHeadline>,
}

/// The unversioned live-feed listing.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LiveFeed {
    #[serde(default)]
    pub headlines: Vec<LiveFeedEntry>,
    /// Listing time as reported by the service (epoch seconds or ISO text)
    #[serde(default, deserialize_with = "string_or_number")]
    pub timestamp: Option<String>,
}

/// On-demand headline query result.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HeadlineList {
    #[serde(default, deserialize_with = "scored_headlines")]
    pub headlines: Vec<NewHeadline>,
}

/// Service liveness.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    #[serde(default)]
    pub timestamp: Option<String>,
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        self.status == "healthy"
    }
}

/// Decode headlines one by one, dropping rows whose sentiment is not
/// positive or negative (the service also emits `neutral`). Any other
/// malformed row still fails the whole payload.
fn scored_headlines<'de, D>(deserializer: D) -> Result<Vec<NewHeadline>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Vec::<serde_json::Value>::deserialize(deserializer)?;
    let mut headlines = Vec::with_capacity(raw.len());

    for mut item in raw {
        if let Some(label) = item.get("sentiment").and_then(serde_json::Value::as_str) {
            match label.parse::<Sentiment>() {
                Ok(sentiment) => item["sentiment"] = sentiment.as_str().into(),
                Err(_) => {
                    tracing::warn!(
                        sentiment = label,
                        headline = item.get("headline").and_then(serde_json::Value::as_str).unwrap_or(""),
                        "Skipping headline with unsupported sentiment"
                    );
                    continue;
                }
            }
        }
        headlines.push(serde_json::from_value(item).map_err(serde::de::Error::custom)?);
    }

    Ok(headlines)
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(serde_json::Number),
    }

    Ok(Option::<Raw>::deserialize(deserializer)?.map(|raw| match raw {
        Raw::Text(s) => s,
        Raw::Number(n) => n.to_string(),
    }))
}

// ============================================================================
// Service Trait
// ============================================================================

/// Request/response contract of the remote news service.
///
/// Implementations must be shareable across tasks; the coordinator holds
/// one behind an `Arc` and calls it from both sync channels concurrently.
#[async_trait]
pub trait RemoteFeedService: Send + Sync {
    /// Whether a generation newer than `cursor` exists. `None` means the
    /// client has never synced.
    async fn check_for_updates(&self, cursor: Option<&str>) -> Result<UpdateCheck, RemoteError>;

    /// Full snapshot for `update_id`.
    async fn get_bulk_update(&self, update_id: &str) -> Result<BulkUpdate, RemoteError>;

    /// Current live-feed listing. `force_refresh` asks the service to bypass
    /// its own cache.
    async fn get_live_feed(&self, force_refresh: bool) -> Result<LiveFeed, RemoteError>;

    /// Headlines for one category/sentiment pair, straight from the service.
    async fn get_headlines(
        &self,
        category: &str,
        sentiment: Sentiment,
        limit: usize,
    ) -> Result<HeadlineList, RemoteError>;

    /// Category names the service knows about.
    async fn get_categories(&self) -> Result<Vec<String>, RemoteError>;

    async fn health_check(&self) -> Result<HealthStatus, RemoteError>;
}
