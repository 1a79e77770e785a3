//! Shared fixtures for the integration tests: a scriptable in-process feed
//! service and headline builders.
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use newsdesk::remote::{
    BulkUpdate, HeadlineList, HealthStatus, LiveFeed, RemoteError, RemoteFeedService, UpdateCheck,
};
use newsdesk::storage::{LiveFeedEntry, LocalStore, NewHeadline, Sentiment};
use newsdesk::sync::{SyncCoordinator, SyncSettings};

pub fn headline(text: &str, category: &str, sentiment: Sentiment, timestamp: &str) -> NewHeadline {
    NewHeadline {
        headline: text.to_string(),
        category: category.to_string(),
        sentiment,
        confidence: 80.0,
        source_url: format!("https://news.example.com/{}", text.replace(' ', "-")),
        image_url: String::new(),
        timestamp: timestamp.to_string(),
    }
}

/// `count` positive technology headlines with increasing timestamps.
pub fn generation(prefix: &str, count: usize) -> Vec<NewHeadline> {
    (0..count)
        .map(|i| {
            headline(
                &format!("{prefix} story {i}"),
                "technology",
                Sentiment::Positive,
                &format!("2024-05-01T10:{:02}:00", i % 60),
            )
        })
        .collect()
}

pub fn live_entry(id: &str, timestamp: &str) -> LiveFeedEntry {
    LiveFeedEntry {
        quick_id: id.to_string(),
        source: "Wire".to_string(),
        category: "world".to_string(),
        headline: format!("Breaking {id}"),
        timestamp: timestamp.to_string(),
        source_url: String::new(),
    }
}

fn unavailable() -> RemoteError {
    RemoteError::Server {
        status: 503,
        message: "Service Unavailable".to_string(),
    }
}

/// In-process [`RemoteFeedService`] whose answers are set per test.
///
/// `latest` is the service's current generation id; `check_for_updates`
/// reports an update whenever the client's cursor differs from it.
#[derive(Default)]
pub struct FakeRemote {
    pub latest: Mutex<Option<String>>,
    pub bulk: Mutex<HashMap<String, Vec<NewHeadline>>>,
    pub live: Mutex<Vec<LiveFeedEntry>>,
    pub on_demand: Mutex<Vec<NewHeadline>>,
    pub delay: Mutex<Option<Duration>>,

    pub fail_check: AtomicBool,
    pub fail_bulk: AtomicBool,
    pub fail_live: AtomicBool,
    pub fail_headlines: AtomicBool,

    pub check_calls: AtomicUsize,
    pub bulk_calls: AtomicUsize,
    pub live_calls: AtomicUsize,
    pub headline_calls: AtomicUsize,
    pub seen_cursors: Mutex<Vec<Option<String>>>,
}

impl FakeRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Publish a generation and make it the latest.
    pub fn publish(&self, update_id: &str, headlines: Vec<NewHeadline>) {
        self.bulk
            .lock()
            .unwrap()
            .insert(update_id.to_string(), headlines);
        *self.latest.lock().unwrap() = Some(update_id.to_string());
    }

    pub fn set_live(&self, entries: Vec<LiveFeedEntry>) {
        *self.live.lock().unwrap() = entries;
    }

    pub fn set_on_demand(&self, headlines: Vec<NewHeadline>) {
        *self.on_demand.lock().unwrap() = headlines;
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn checks(&self) -> usize {
        self.check_calls.load(Ordering::SeqCst)
    }

    pub fn bulks(&self) -> usize {
        self.bulk_calls.load(Ordering::SeqCst)
    }

    pub fn lives(&self) -> usize {
        self.live_calls.load(Ordering::SeqCst)
    }

    async fn pause(&self) {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl RemoteFeedService for FakeRemote {
    async fn check_for_updates(&self, cursor: Option<&str>) -> Result<UpdateCheck, RemoteError> {
        self.check_calls.fetch_add(1, Ordering::SeqCst);
        self.seen_cursors
            .lock()
            .unwrap()
            .push(cursor.map(str::to_string));
        self.pause().await;

        if self.fail_check.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        let latest = self.latest.lock().unwrap().clone();
        Ok(UpdateCheck {
            has_update: latest.is_some() && latest.as_deref() != cursor,
            latest_update_id: latest,
        })
    }

    async fn get_bulk_update(&self, update_id: &str) -> Result<BulkUpdate, RemoteError> {
        self.bulk_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;

        if self.fail_bulk.load(Ordering::SeqCst) {
            return Err(RemoteError::Timeout);
        }
        let headlines = self
            .bulk
            .lock()
            .unwrap()
            .get(update_id)
            .cloned()
            .ok_or_else(|| RemoteError::Server {
                status: 404,
                message: format!("Update {update_id} not found"),
            })?;
        Ok(BulkUpdate {
            update_id: Some(update_id.to_string()),
            headlines,
        })
    }

    async fn get_live_feed(&self, _force_refresh: bool) -> Result<LiveFeed, RemoteError> {
        self.live_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;

        if self.fail_live.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        Ok(LiveFeed {
            headlines: self.live.lock().unwrap().clone(),
            timestamp: Some("1714557600".to_string()),
        })
    }

    async fn get_headlines(
        &self,
        category: &str,
        sentiment: Sentiment,
        limit: usize,
    ) -> Result<HeadlineList, RemoteError> {
        self.headline_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_headlines.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        let headlines = self
            .on_demand
            .lock()
            .unwrap()
            .iter()
            .filter(|h| h.category == category && h.sentiment == sentiment)
            .take(limit)
            .cloned()
            .collect();
        Ok(HeadlineList { headlines })
    }

    async fn get_categories(&self) -> Result<Vec<String>, RemoteError> {
        Ok(vec!["technology".to_string(), "world".to_string()])
    }

    async fn health_check(&self) -> Result<HealthStatus, RemoteError> {
        Ok(HealthStatus {
            status: "healthy".to_string(),
            timestamp: None,
        })
    }
}

pub async fn memory_store() -> LocalStore {
    let store = LocalStore::open(":memory:").await;
    assert!(store.is_available());
    store
}

pub fn coordinator_with(
    store: LocalStore,
    remote: Arc<FakeRemote>,
    settings: SyncSettings,
) -> Arc<SyncCoordinator> {
    Arc::new(SyncCoordinator::new(store, remote, settings))
}

pub async fn coordinator(remote: Arc<FakeRemote>) -> Arc<SyncCoordinator> {
    coordinator_with(memory_store().await, remote, SyncSettings::default())
}
