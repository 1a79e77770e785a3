//! Sync coordination between the local store and the remote feed service.
//!
//! Two channels run independently:
//!
//! - **Headlines**: ask the service whether a generation newer than the
//!   local cursor exists; if so, download the full snapshot and swap it in
//!   with [`LocalStore::replace_all_data`].
//! - **Live feed**: no versioning, so every sync force-fetches the listing
//!   and overwrites the stored snapshot.
//!
//! Each channel is single-flight (an overlapping call returns
//! [`SyncOutcome::AlreadyRunning`] without touching the network) and has
//! its own cadence gate (5 minutes and 1 hour by default). Failures never
//! escape as errors; they come back as [`SyncOutcome::Failed`] and the next
//! cadence tick retries from the same cursor.

mod channel;
mod reader;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::remote::{RemoteError, RemoteFeedService};
use crate::storage::{LiveFeedSnapshot, LocalStore, StorageError};

pub use channel::Channel;
use channel::ChannelState;
pub use reader::{HeadlinePage, HeadlineReader, LiveFeedPage, Origin};

/// Minimum spacing between gated headline checks
pub const DEFAULT_HEADLINES_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Minimum spacing between gated live-feed refreshes
pub const DEFAULT_LIVE_FEED_INTERVAL: Duration = Duration::from_secs(60 * 60);

// ============================================================================
// Errors and Outcomes
// ============================================================================

/// Why a sync attempt failed. Local state is untouched in every case.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Feed service unavailable: {0}")]
    Remote(#[from] RemoteError),

    #[error("Local store unavailable: {0}")]
    Storage(#[from] StorageError),

    #[error("Feed service reported an update without an update id")]
    MissingUpdateId,

    /// Empty live-feed listings are rejected so a good snapshot is never
    /// overwritten with nothing
    #[error("Live feed returned no entries, keeping previous snapshot")]
    EmptyLiveFeed,
}

/// Result of one sync call on one channel.
#[derive(Debug)]
pub enum SyncOutcome {
    /// New data committed. `update_id` is `None` for the live feed.
    Updated {
        update_id: Option<String>,
        count: usize,
    },
    /// The service has nothing newer than the local cursor
    UpToDate,
    /// Another sync on this channel is running; nothing was done
    AlreadyRunning,
    /// The cadence gate has not elapsed; nothing was done
    Throttled,
    Failed(SyncError),
}

impl SyncOutcome {
    /// The boolean view: true when the channel is now current.
    pub fn is_success(&self) -> bool {
        matches!(self, SyncOutcome::Updated { .. } | SyncOutcome::UpToDate)
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, SyncOutcome::Failed(_))
    }

    pub fn did_update(&self) -> bool {
        matches!(self, SyncOutcome::Updated { .. })
    }
}

impl fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncOutcome::Updated {
                update_id: Some(id),
                count,
            } => write!(f, "updated to {id} ({count} items)"),
            SyncOutcome::Updated {
                update_id: None,
                count,
            } => write!(f, "updated ({count} items)"),
            SyncOutcome::UpToDate => f.write_str("up to date"),
            SyncOutcome::AlreadyRunning => f.write_str("already running"),
            SyncOutcome::Throttled => f.write_str("throttled"),
            SyncOutcome::Failed(e) => write!(f, "failed: {e}"),
        }
    }
}

/// Outcomes of a call that drives both channels.
#[derive(Debug)]
pub struct SyncReport {
    pub headlines: SyncOutcome,
    pub live_feed: SyncOutcome,
}

/// Diagnostics for one channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelStatus {
    pub in_flight: bool,
    pub last_attempt: Option<DateTime<Utc>>,
}

/// Diagnostics for both channels.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncStatus {
    pub headlines: ChannelStatus,
    pub live_feed: ChannelStatus,
}

// ============================================================================
// Settings
// ============================================================================

/// Cadence of each channel. A zero interval disables throttling and the
/// recurring task for that channel (manual sync only).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSettings {
    pub headlines_interval: Duration,
    pub live_feed_interval: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            headlines_interval: DEFAULT_HEADLINES_INTERVAL,
            live_feed_interval: DEFAULT_LIVE_FEED_INTERVAL,
        }
    }
}

impl SyncSettings {
    pub fn interval(&self, channel: Channel) -> Duration {
        match channel {
            Channel::Headlines => self.headlines_interval,
            Channel::LiveFeed => self.live_feed_interval,
        }
    }
}

// ============================================================================
// SyncCoordinator
// ============================================================================

/// The only writer of the local store.
///
/// Built once at startup and shared as `Arc<SyncCoordinator>` with whatever
/// triggers syncs (timers, foreground notifications, user refresh).
pub struct SyncCoordinator {
    store: LocalStore,
    remote: Arc<dyn RemoteFeedService>,
    settings: SyncSettings,
    headlines: ChannelState,
    live_feed: ChannelState,
}

impl SyncCoordinator {
    pub fn new(
        store: LocalStore,
        remote: Arc<dyn RemoteFeedService>,
        settings: SyncSettings,
    ) -> Self {
        Self {
            store,
            remote,
            settings,
            headlines: ChannelState::default(),
            live_feed: ChannelState::default(),
        }
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    pub fn remote(&self) -> &Arc<dyn RemoteFeedService> {
        &self.remote
    }

    pub fn settings(&self) -> SyncSettings {
        self.settings
    }

    fn state(&self, channel: Channel) -> &ChannelState {
        match channel {
            Channel::Headlines => &self.headlines,
            Channel::LiveFeed => &self.live_feed,
        }
    }

    // ========================================================================
    // Headlines Channel
    // ========================================================================

    /// Bring the headline table up to the service's latest generation.
    ///
    /// Returns [`SyncOutcome::AlreadyRunning`] immediately if a headline sync
    /// is in progress. The in-flight claim is released on every exit path.
    pub async fn sync_if_needed(&self) -> SyncOutcome {
        let Some(_guard) = self.headlines.try_begin() else {
            tracing::debug!("Headline sync already in progress");
            return SyncOutcome::AlreadyRunning;
        };

        match self.sync_headlines().await {
            Ok(outcome) => {
                tracing::info!(outcome = %outcome, "Headline sync finished");
                outcome
            }
            Err(e) => {
                tracing::warn!(error = %e, "Headline sync failed, will retry on next tick");
                SyncOutcome::Failed(e)
            }
        }
    }

    async fn sync_headlines(&self) -> Result<SyncOutcome, SyncError> {
        if !self.store.is_available() {
            return Err(StorageError::Unavailable.into());
        }

        let cursor = self.store.get_last_update_id().await;
        tracing::debug!(cursor = cursor.as_deref().unwrap_or("none"), "Checking for updates");

        let check = self.remote.check_for_updates(cursor.as_deref()).await?;
        if !check.has_update {
            return Ok(SyncOutcome::UpToDate);
        }

        let update_id = check.latest_update_id.ok_or(SyncError::MissingUpdateId)?;
        tracing::debug!(update_id = %update_id, "New generation available, downloading");

        let bulk = self.remote.get_bulk_update(&update_id).await?;
        if let Some(served) = bulk.update_id.as_deref() {
            if served != update_id {
                tracing::debug!(requested = %update_id, served, "Bulk download reported a different update id");
            }
        }

        let count = self.store.replace_all_data(&bulk.headlines, &update_id).await?;
        Ok(SyncOutcome::Updated {
            update_id: Some(update_id),
            count,
        })
    }

    /// Cadence-gated [`sync_if_needed`](Self::sync_if_needed).
    ///
    /// The attempt is recorded before the sync starts, so triggers arriving
    /// while it is still evaluating are throttled too.
    pub async fn check_for_updates_if_needed(&self) -> SyncOutcome {
        if !self
            .headlines
            .try_claim_slot(self.settings.headlines_interval)
        {
            tracing::debug!("Skipping headline check, last attempt too recent");
            return SyncOutcome::Throttled;
        }
        self.sync_if_needed().await
    }

    // ========================================================================
    // Live Feed Channel
    // ========================================================================

    /// Force-fetch the live feed and overwrite the stored snapshot.
    ///
    /// On a fetch error, a store error or an empty listing the previous
    /// snapshot stays in place and the outcome is a failure.
    pub async fn sync_live_feed(&self) -> SyncOutcome {
        let Some(_guard) = self.live_feed.try_begin() else {
            tracing::debug!("Live feed sync already in progress");
            return SyncOutcome::AlreadyRunning;
        };

        match self.refresh_live_feed().await {
            Ok(count) => {
                tracing::info!(count, "Live feed sync finished");
                SyncOutcome::Updated {
                    update_id: None,
                    count,
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Live feed sync failed, will retry on next tick");
                SyncOutcome::Failed(e)
            }
        }
    }

    async fn refresh_live_feed(&self) -> Result<usize, SyncError> {
        if !self.store.is_available() {
            return Err(StorageError::Unavailable.into());
        }

        let feed = self.remote.get_live_feed(true).await?;
        if feed.headlines.is_empty() {
            return Err(SyncError::EmptyLiveFeed);
        }

        let count = feed.headlines.len();
        self.store
            .replace_live_feed(&LiveFeedSnapshot {
                entries: feed.headlines,
                remote_timestamp: feed.timestamp,
            })
            .await?;
        Ok(count)
    }

    /// Cadence-gated [`sync_live_feed`](Self::sync_live_feed).
    pub async fn sync_live_feed_if_needed(&self) -> SyncOutcome {
        if !self
            .live_feed
            .try_claim_slot(self.settings.live_feed_interval)
        {
            tracing::debug!("Skipping live feed refresh, last attempt too recent");
            return SyncOutcome::Throttled;
        }
        self.sync_live_feed().await
    }

    // ========================================================================
    // Triggers
    // ========================================================================

    /// User-requested refresh: open both gates and sync both channels now.
    ///
    /// The gates stay open afterwards, so the next gated check runs without
    /// waiting out its interval.
    pub async fn force_sync(&self) -> SyncReport {
        tracing::info!("Force sync requested");
        self.headlines.reset();
        self.live_feed.reset();

        let (headlines, live_feed) = tokio::join!(self.sync_if_needed(), self.sync_live_feed());
        SyncReport {
            headlines,
            live_feed,
        }
    }

    /// App came to the foreground. Both gated checks run; their gates absorb
    /// rapid repeated foregrounding.
    pub async fn on_foreground(&self) -> SyncReport {
        tracing::debug!("Foreground transition");
        let (headlines, live_feed) = tokio::join!(
            self.check_for_updates_if_needed(),
            self.sync_live_feed_if_needed()
        );
        SyncReport {
            headlines,
            live_feed,
        }
    }

    async fn run_now(&self, channel: Channel) -> SyncOutcome {
        self.state(channel).mark_attempt();
        match channel {
            Channel::Headlines => self.sync_if_needed().await,
            Channel::LiveFeed => self.sync_live_feed().await,
        }
    }

    async fn run_gated(&self, channel: Channel) -> SyncOutcome {
        match channel {
            Channel::Headlines => self.check_for_updates_if_needed().await,
            Channel::LiveFeed => self.sync_live_feed_if_needed().await,
        }
    }

    /// Sync both channels once, then keep each on its own recurring timer.
    ///
    /// The tasks live until the returned handle is shut down or dropped.
    /// Must be called from within a tokio runtime.
    pub fn start_auto_sync(self: &Arc<Self>) -> AutoSyncHandle {
        tracing::info!(
            headlines_secs = self.settings.headlines_interval.as_secs(),
            live_feed_secs = self.settings.live_feed_interval.as_secs(),
            "Starting auto-sync"
        );
        let (stop, stopped) = watch::channel(false);
        AutoSyncHandle {
            tasks: vec![
                self.spawn_channel_loop(Channel::Headlines, stopped.clone()),
                self.spawn_channel_loop(Channel::LiveFeed, stopped),
            ],
            stop,
        }
    }

    fn spawn_channel_loop(
        self: &Arc<Self>,
        channel: Channel,
        mut stopped: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let coordinator = Arc::clone(self);
        let period = self.settings.interval(channel);

        tokio::spawn(async move {
            let outcome = coordinator.run_now(channel).await;
            tracing::debug!(channel = %channel, outcome = %outcome, "Initial sync");

            if period.is_zero() {
                tracing::info!(channel = %channel, "Interval is zero, recurring sync disabled");
                return;
            }

            // Foreground and forced syncs move the deadline. Only the wait is
            // cancellable; a sync that has started runs to completion.
            loop {
                let due = coordinator.state(channel).next_due(period);
                tokio::select! {
                    biased;
                    _ = stopped.changed() => break,
                    _ = tokio::time::sleep_until(due) => {}
                }

                let outcome = coordinator.run_gated(channel).await;
                tracing::debug!(channel = %channel, outcome = %outcome, "Scheduled sync");
            }
            tracing::debug!(channel = %channel, "Auto-sync loop stopped");
        })
    }

    // ========================================================================
    // Diagnostics
    // ========================================================================

    pub fn get_sync_status(&self) -> SyncStatus {
        SyncStatus {
            headlines: ChannelStatus {
                in_flight: self.headlines.is_in_flight(),
                last_attempt: self.headlines.last_attempt(),
            },
            live_feed: ChannelStatus {
                in_flight: self.live_feed.is_in_flight(),
                last_attempt: self.live_feed.last_attempt(),
            },
        }
    }
}

// ============================================================================
// AutoSyncHandle
// ============================================================================

/// Owns the recurring sync tasks.
///
/// Stopping never interrupts a sync: each task leaves at its next wait.
/// Dropping the handle sends the stop signal without waiting.
pub struct AutoSyncHandle {
    tasks: Vec<JoinHandle<()>>,
    stop: watch::Sender<bool>,
}

impl AutoSyncHandle {
    /// Stop both recurring tasks, letting any running sync finish first.
    pub async fn shutdown(mut self) {
        self.stop.send_replace(true);
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Auto-sync task ended abnormally");
            }
        }
        tracing::info!("Auto-sync stopped");
    }

    pub fn is_running(&self) -> bool {
        self.tasks.iter().any(|t| !t.is_finished())
    }
}

impl Drop for AutoSyncHandle {
    fn drop(&mut self) {
        self.stop.send_replace(true);
    }
}
