use std::sync::Arc;

use crate::remote::RemoteError;
use crate::storage::{HeadlineRecord, LiveFeedEntry, NewHeadline, Sentiment};

use super::SyncCoordinator;

/// Where a page of results came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Local,
    Remote,
}

/// Headlines for one category/sentiment pair.
#[derive(Debug, Clone, PartialEq)]
pub enum HeadlinePage {
    /// Rows from the local store
    Local(Vec<HeadlineRecord>),
    /// Rows fetched on demand because the local store had none
    Remote(Vec<NewHeadline>),
}

impl HeadlinePage {
    pub fn origin(&self) -> Origin {
        match self {
            HeadlinePage::Local(_) => Origin::Local,
            HeadlinePage::Remote(_) => Origin::Remote,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            HeadlinePage::Local(rows) => rows.len(),
            HeadlinePage::Remote(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `(headline, source_url, timestamp)` for each row, whatever the origin.
    pub fn summaries(&self) -> Vec<(&str, &str, &str)> {
        match self {
            HeadlinePage::Local(rows) => rows
                .iter()
                .map(|r| (r.headline.as_str(), r.source_url.as_str(), r.timestamp.as_str()))
                .collect(),
            HeadlinePage::Remote(rows) => rows
                .iter()
                .map(|r| (r.headline.as_str(), r.source_url.as_str(), r.timestamp.as_str()))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LiveFeedPage {
    pub entries: Vec<LiveFeedEntry>,
    pub origin: Origin,
}

/// Read side of the engine: local first, remote when the store is empty.
///
/// Never writes to the store. Remote fallback results are shown but not
/// cached; only the coordinator commits data.
#[derive(Clone)]
pub struct HeadlineReader {
    coordinator: Arc<SyncCoordinator>,
}

impl HeadlineReader {
    pub fn new(coordinator: Arc<SyncCoordinator>) -> Self {
        Self { coordinator }
    }

    pub async fn headlines(
        &self,
        category: &str,
        sentiment: Sentiment,
        limit: usize,
    ) -> Result<HeadlinePage, RemoteError> {
        let local_limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = self
            .coordinator
            .store()
            .get_headlines(category, sentiment, local_limit)
            .await;
        if !rows.is_empty() {
            return Ok(HeadlinePage::Local(rows));
        }

        tracing::debug!(category, sentiment = %sentiment, "No local headlines, asking the service");
        let list = self
            .coordinator
            .remote()
            .get_headlines(category, sentiment, limit)
            .await?;
        Ok(HeadlinePage::Remote(list.headlines))
    }

    pub async fn live_feed(&self, limit: usize) -> Result<LiveFeedPage, RemoteError> {
        let entries = self
            .coordinator
            .store()
            .get_live_feed_headlines(limit)
            .await;
        if !entries.is_empty() {
            return Ok(LiveFeedPage {
                entries,
                origin: Origin::Local,
            });
        }

        tracing::debug!("No local live feed, asking the service");
        let mut feed = self.coordinator.remote().get_live_feed(false).await?;
        feed.headlines.truncate(limit);
        Ok(LiveFeedPage {
            entries: feed.headlines,
            origin: Origin::Remote,
        })
    }

    /// Pull-to-refresh: sync headlines, then read again.
    pub async fn refresh(
        &self,
        category: &str,
        sentiment: Sentiment,
        limit: usize,
    ) -> Result<HeadlinePage, RemoteError> {
        let outcome = self.coordinator.sync_if_needed().await;
        tracing::debug!(outcome = %outcome, "Refresh sync");
        self.headlines(category, sentiment, limit).await
    }
}
