use super::schema::LocalStore;
use super::types::{LiveFeedEntry, LiveFeedSnapshot, StorageError};

impl LocalStore {
    // ========================================================================
    // Live Feed Snapshot
    // ========================================================================

    /// Overwrite the live-feed snapshot with `snapshot`.
    ///
    /// The snapshot is stored as a single JSON document in a single-row
    /// table, so the overwrite is one statement and readers see either the
    /// old listing or the new one.
    pub async fn replace_live_feed(&self, snapshot: &LiveFeedSnapshot) -> Result<(), StorageError> {
        let pool = self.pool()?;
        let payload = serde_json::to_string(&snapshot.entries)?;

        sqlx::query(
            r#"
            INSERT INTO live_feed_snapshot (id, payload, remote_timestamp, fetched_at)
            VALUES (1, ?, ?, datetime('now'))
            ON CONFLICT(id) DO UPDATE SET
                payload = excluded.payload,
                remote_timestamp = excluded.remote_timestamp,
                fetched_at = excluded.fetched_at
        "#,
        )
        .bind(&payload)
        .bind(&snapshot.remote_timestamp)
        .execute(pool)
        .await?;

        tracing::info!(entries = snapshot.entries.len(), "Replaced live feed snapshot");
        Ok(())
    }

    /// The stored snapshot, if one has been written.
    pub async fn get_live_feed_snapshot(&self) -> Result<Option<LiveFeedSnapshot>, StorageError> {
        let pool = self.pool()?;

        let row: Option<(String, Option<String>)> =
            sqlx::query_as("SELECT payload, remote_timestamp FROM live_feed_snapshot WHERE id = 1")
                .fetch_optional(pool)
                .await?;

        match row {
            Some((payload, remote_timestamp)) => Ok(Some(LiveFeedSnapshot {
                entries: serde_json::from_str(&payload)?,
                remote_timestamp,
            })),
            None => Ok(None),
        }
    }

    /// The `limit` most recent live-feed entries, newest first.
    ///
    /// Reads only the snapshot, never the headline table. Never fails: an
    /// unavailable store, a missing snapshot or a corrupt payload all yield
    /// an empty list.
    pub async fn get_live_feed_headlines(&self, limit: usize) -> Vec<LiveFeedEntry> {
        let snapshot = match self.get_live_feed_snapshot().await {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) | Err(StorageError::Unavailable) => return Vec::new(),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read live feed snapshot");
                return Vec::new();
            }
        };

        let mut entries = snapshot.entries;
        // Stable sort keeps the service's order among equal timestamps
        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        entries.truncate(limit);
        entries
    }
}
