use sqlx::{QueryBuilder, Sqlite, Transaction};

use super::cursor::{LAST_SYNC_TIME, LAST_UPDATE_ID};
use super::schema::LocalStore;
use super::types::{DataStats, HeadlineDbRow, HeadlineRecord, NewHeadline, Sentiment, StorageError};

/// Rows per INSERT statement. 8 binds per row keeps a chunk well under
/// SQLite's 999 parameter limit.
const BATCH_SIZE: usize = 50;

/// Hard cap on rows returned by a single headline query
const MAX_HEADLINES: i64 = 2000;

impl LocalStore {
    // ========================================================================
    // Bulk Replace
    // ========================================================================

    /// Swap the headline table for a new generation.
    ///
    /// Deletes every headline row, inserts `headlines` in batches and upserts
    /// the cursor (`last_update_id`, `last_sync_time`) inside one transaction.
    /// Either all three steps commit or none do; on error the store keeps its
    /// previous generation and cursor.
    ///
    /// An empty `headlines` slice is a valid generation: the table is emptied
    /// and the cursor still advances.
    ///
    /// Returns the number of rows inserted.
    pub async fn replace_all_data(
        &self,
        headlines: &[NewHeadline],
        update_id: &str,
    ) -> Result<usize, StorageError> {
        let pool = self.pool()?;
        let synced_at = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S").to_string();

        let mut tx = pool.begin().await?;
        let inserted = match write_generation(&mut tx, headlines, update_id, &synced_at).await {
            Ok(inserted) => inserted,
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::warn!(error = %rollback_err, "Rollback after failed replace also failed");
                }
                tracing::warn!(update_id = %update_id, error = %e, "Headline replace rolled back");
                return Err(e.into());
            }
        };
        tx.commit().await?;

        self.mirror.set(LAST_UPDATE_ID, update_id);
        self.mirror.set(LAST_SYNC_TIME, &synced_at);

        tracing::info!(update_id = %update_id, inserted, "Replaced local headlines");
        Ok(inserted)
    }

    // ========================================================================
    // Headline Queries
    // ========================================================================

    /// Headlines for one category/sentiment pair, newest first.
    ///
    /// Never fails: an unavailable store or a query error yields an empty
    /// list, which callers treat as "go ask the remote".
    pub async fn get_headlines(
        &self,
        category: &str,
        sentiment: Sentiment,
        limit: i64,
    ) -> Vec<HeadlineRecord> {
        match self.try_get_headlines(category, sentiment, limit).await {
            Ok(rows) => {
                tracing::debug!(category, %sentiment, count = rows.len(), "Read local headlines");
                rows
            }
            Err(StorageError::Unavailable) => Vec::new(),
            Err(e) => {
                tracing::warn!(category, %sentiment, error = %e, "Failed to read local headlines");
                Vec::new()
            }
        }
    }

    async fn try_get_headlines(
        &self,
        category: &str,
        sentiment: Sentiment,
        limit: i64,
    ) -> Result<Vec<HeadlineRecord>, StorageError> {
        let pool = self.pool()?;
        let limit = limit.clamp(0, MAX_HEADLINES);

        let rows: Vec<HeadlineDbRow> = sqlx::query_as(
            r#"
            SELECT id, headline, category, sentiment, confidence, source_url, image_url,
                   timestamp, update_id, created_at
            FROM local_headlines
            WHERE category = ? AND sentiment = ?
            ORDER BY timestamp DESC
            LIMIT ?
        "#,
        )
        .bind(category)
        .bind(sentiment.as_str())
        .bind(limit)
        .fetch_all(pool)
        .await?;

        Ok(rows.into_iter().filter_map(HeadlineDbRow::into_record).collect())
    }

    // ========================================================================
    // Diagnostics
    // ========================================================================

    /// Row count, newest timestamp and cursor. Zeroed stats on failure.
    pub async fn get_data_stats(&self) -> DataStats {
        let pool = match self.pool() {
            Ok(pool) => pool,
            Err(_) => return DataStats::default(),
        };

        let row: Result<(i64, Option<String>), sqlx::Error> =
            sqlx::query_as("SELECT COUNT(*), MAX(timestamp) FROM local_headlines")
                .fetch_one(pool)
                .await;

        match row {
            Ok((total, latest)) => DataStats {
                total_headlines: total,
                latest_timestamp: latest,
                last_update_id: self.get_last_update_id().await,
                last_sync_time: self.get_last_sync_time().await,
                has_data: total > 0,
            },
            Err(e) => {
                tracing::warn!(error = %e, "Failed to compute data stats");
                DataStats::default()
            }
        }
    }

    /// Wipe headlines, cursor metadata, the live-feed snapshot and the
    /// cursor mirror. Reset/debug tooling only; sync never calls this.
    pub async fn clear_all_data(&self) -> Result<(), StorageError> {
        let pool = self.pool()?;
        let mut tx = pool.begin().await?;

        sqlx::query("DELETE FROM local_headlines")
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM sync_metadata")
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM live_feed_snapshot")
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        self.mirror.clear();

        tracing::info!("Cleared all local data");
        Ok(())
    }
}

/// Delete, batch-insert and cursor upsert, all on the caller's transaction.
async fn write_generation(
    tx: &mut Transaction<'_, Sqlite>,
    headlines: &[NewHeadline],
    update_id: &str,
    synced_at: &str,
) -> Result<usize, sqlx::Error> {
    sqlx::query("DELETE FROM local_headlines")
        .execute(&mut **tx)
        .await?;

    let mut inserted = 0usize;
    for chunk in headlines.chunks(BATCH_SIZE) {
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
            "INSERT INTO local_headlines \
             (headline, category, sentiment, confidence, source_url, image_url, timestamp, update_id) ",
        );

        builder.push_values(chunk, |mut b, h| {
            b.push_bind(&h.headline)
                .push_bind(&h.category)
                .push_bind(h.sentiment.as_str())
                .push_bind(h.confidence)
                .push_bind(&h.source_url)
                .push_bind(&h.image_url)
                .push_bind(&h.timestamp)
                .push_bind(update_id);
        });

        let result = builder.build().execute(&mut **tx).await?;
        inserted += result.rows_affected() as usize;
    }

    for (key, value) in [(LAST_UPDATE_ID, update_id), (LAST_SYNC_TIME, synced_at)] {
        sqlx::query(
            r#"
            INSERT INTO sync_metadata (key, value, updated_at)
            VALUES (?, ?, datetime('now'))
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
        "#,
        )
        .bind(key)
        .bind(value)
        .execute(&mut **tx)
        .await?;
    }

    Ok(inserted)
}
