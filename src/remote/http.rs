use async_trait::async_trait;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use url::Url;

use super::{
    BulkUpdate, HeadlineList, HealthStatus, LiveFeed, RemoteError, RemoteFeedService, UpdateCheck,
};
use crate::storage::Sentiment;

/// Bodies larger than this are rejected
const MAX_RESPONSE_SIZE: usize = 10 * 1024 * 1024; // 10MB

/// [`RemoteFeedService`] over the service's HTTP/JSON API.
///
/// Endpoints are resolved relative to the base URL, e.g. a base of
/// `http://host:5000/api` yields `http://host:5000/api/check-updates/none`.
/// No retries happen here: a failed request is reported and the sync
/// cadence decides when to try again.
#[derive(Clone)]
pub struct HttpFeedClient {
    client: reqwest::Client,
    base: Url,
    timeout: Duration,
}

impl HttpFeedClient {
    /// Build a client for `base_url` with a per-request `timeout`.
    ///
    /// # Errors
    ///
    /// [`RemoteError::InvalidBaseUrl`] if the URL does not parse, is not
    /// http(s), or cannot carry path segments.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, RemoteError> {
        Self::with_client(reqwest::Client::new(), base_url, timeout)
    }

    /// Same as [`HttpFeedClient::new`] with a caller-supplied reqwest client.
    pub fn with_client(
        client: reqwest::Client,
        base_url: &str,
        timeout: Duration,
    ) -> Result<Self, RemoteError> {
        let base = Url::parse(base_url)
            .map_err(|e| RemoteError::InvalidBaseUrl(format!("{base_url}: {e}")))?;

        if !matches!(base.scheme(), "http" | "https") {
            return Err(RemoteError::InvalidBaseUrl(format!(
                "{base_url}: scheme must be http or https"
            )));
        }
        if base.cannot_be_a_base() {
            return Err(RemoteError::InvalidBaseUrl(base_url.to_string()));
        }
        if base.scheme() == "http" {
            tracing::debug!(base_url = %base, "Using plain HTTP for the feed service");
        }

        Ok(Self {
            client,
            base,
            timeout,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// Base URL with `segments` appended, each percent-encoded.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        // cannot_be_a_base() was rejected in with_client
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, RemoteError> {
        tracing::debug!(url = %url, "GET");
        let bytes = tokio::time::timeout(self.timeout, self.fetch(url.clone()))
            .await
            .map_err(|_| {
                tracing::warn!(url = %url, timeout_secs = self.timeout.as_secs_f64(), "Feed service request timed out");
                RemoteError::Timeout
            })??;

        serde_json::from_slice(&bytes).map_err(|e| RemoteError::Decode(e.to_string()))
    }

    async fn fetch(&self, url: Url) -> Result<Vec<u8>, RemoteError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = read_limited_bytes(response, MAX_RESPONSE_SIZE)
                .await
                .unwrap_or_default();
            return Err(RemoteError::Server {
                status: status.as_u16(),
                message: error_message(&body)
                    .or_else(|| status.canonical_reason().map(str::to_string))
                    .unwrap_or_else(|| "Server error".to_string()),
            });
        }

        read_limited_bytes(response, MAX_RESPONSE_SIZE).await
    }
}

/// `{"error": "..."}` bodies carry the service's own explanation
fn error_message(body: &[u8]) -> Option<String> {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: Option<String>,
    }

    serde_json::from_slice::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.error)
        .filter(|m| !m.is_empty())
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, RemoteError> {
    // Fast path: check Content-Length header
    if let Some(len) = response.content_length() {
        if len as usize > limit {
            return Err(RemoteError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(RemoteError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(bytes)
}

#[async_trait]
impl RemoteFeedService for HttpFeedClient {
    async fn check_for_updates(&self, cursor: Option<&str>) -> Result<UpdateCheck, RemoteError> {
        let url = self.endpoint(&["check-updates", cursor.unwrap_or("none")]);
        self.get_json(url).await
    }

    async fn get_bulk_update(&self, update_id: &str) -> Result<BulkUpdate, RemoteError> {
        let url = self.endpoint(&["bulk-download", update_id]);
        self.get_json(url).await
    }

    async fn get_live_feed(&self, force_refresh: bool) -> Result<LiveFeed, RemoteError> {
        let mut url = self.endpoint(&["live-feed"]);
        if force_refresh {
            url.query_pairs_mut().append_pair("refresh", "true");
        }
        self.get_json(url).await
    }

    async fn get_headlines(
        &self,
        category: &str,
        sentiment: Sentiment,
        limit: usize,
    ) -> Result<HeadlineList, RemoteError> {
        let mut url = self.endpoint(&["headlines", category, sentiment.as_str()]);
        url.query_pairs_mut()
            .append_pair("limit", &limit.to_string());
        self.get_json(url).await
    }

    async fn get_categories(&self) -> Result<Vec<String>, RemoteError> {
        #[derive(Deserialize)]
        struct Categories {
            #[serde(default)]
            categories: Vec<String>,
        }

        let url = self.endpoint(&["categories"]);
        let body: Categories = self.get_json(url).await?;
        Ok(body.categories)
    }

    async fn health_check(&self) -> Result<HealthStatus, RemoteError> {
        let url = self.endpoint(&["health"]);
        self.get_json(url).await
    }
}
