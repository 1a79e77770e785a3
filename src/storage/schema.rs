use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::cursor::CursorMirror;
use super::types::StorageError;

// ============================================================================
// LocalStore
// ============================================================================

/// Device-local store for the headline table, the sync cursor and the
/// live-feed snapshot.
///
/// Cloning is cheap: clones share the pool, the availability flag and the
/// cursor mirror. A store that failed to open is still a valid value; it
/// reports `is_available() == false`, answers reads with empty results and
/// rejects writes with [`StorageError::Unavailable`].
#[derive(Clone)]
pub struct LocalStore {
    pub(crate) pool: Option<SqlitePool>,
    available: Arc<AtomicBool>,
    pub(crate) mirror: CursorMirror,
}

impl LocalStore {
    /// Open the store at `path` (`":memory:"` for an in-memory database)
    /// and create the schema.
    ///
    /// Never fails. Connection or migration errors are logged and leave the
    /// store in the unavailable state.
    pub async fn open(path: &str) -> Self {
        let pool = match Self::connect(path).await {
            Ok(pool) => Some(pool),
            Err(e) => {
                tracing::error!(path = %path, error = %e, "Failed to open local store, running without offline cache");
                None
            }
        };

        let store = Self {
            pool,
            available: Arc::new(AtomicBool::new(false)),
            mirror: CursorMirror::new(),
        };
        store.initialize().await;
        store
    }

    async fn connect(path: &str) -> Result<SqlitePool, sqlx::Error> {
        let url = format!("sqlite:{}?mode=rwc", path);

        // busy_timeout covers the readers that overlap a bulk replace;
        // sqlx defaults file databases to WAL, so they keep seeing the
        // pre-replace snapshot until commit.
        let options = SqliteConnectOptions::from_str(&url)?.pragma("busy_timeout", "5000");

        SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
    }

    /// Create the schema if absent. Idempotent.
    ///
    /// Returns the resulting availability. Failure flips the store to
    /// unavailable instead of returning an error.
    pub async fn initialize(&self) -> bool {
        let Some(pool) = &self.pool else {
            self.available.store(false, Ordering::Release);
            return false;
        };

        match migrate(pool).await {
            Ok(()) => {
                self.available.store(true, Ordering::Release);
                tracing::debug!("Local store initialized");
                true
            }
            Err(e) => {
                tracing::error!(error = %e, "Local store schema creation failed, marking unavailable");
                self.available.store(false, Ordering::Release);
                false
            }
        }
    }

    /// Whether the store opened and initialized successfully.
    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Acquire) && self.pool.is_some()
    }

    /// The pool, if the store is usable.
    pub(crate) fn pool(&self) -> Result<&SqlitePool, StorageError> {
        match &self.pool {
            Some(pool) if self.is_available() => Ok(pool),
            _ => Err(StorageError::Unavailable),
        }
    }
}

/// Run all schema statements in one transaction.
///
/// Every statement uses `IF NOT EXISTS`, so re-running on an existing
/// database is a no-op.
async fn migrate(pool: &SqlitePool) -> Result<(), StorageError> {
    let mut tx = pool.begin().await?;

    // No uniqueness on purpose: generations are swapped by full replace
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS local_headlines (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            headline TEXT NOT NULL,
            category TEXT NOT NULL,
            sentiment TEXT NOT NULL,
            confidence REAL NOT NULL DEFAULT 0 CHECK (confidence >= 0 AND confidence <= 100),
            source_url TEXT NOT NULL DEFAULT '',
            image_url TEXT NOT NULL DEFAULT '',
            timestamp TEXT NOT NULL,
            update_id TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        )
    "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_category_sentiment ON local_headlines(category, sentiment)",
    )
    .execute(&mut *tx)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_timestamp ON local_headlines(timestamp DESC)")
        .execute(&mut *tx)
        .await?;

    // Cursor record: last_update_id and last_sync_time rows
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sync_metadata (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        )
    "#,
    )
    .execute(&mut *tx)
    .await?;

    // Single-row table holding the live feed as one JSON document
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS live_feed_snapshot (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            payload TEXT NOT NULL,
            remote_timestamp TEXT,
            fetched_at TEXT NOT NULL DEFAULT (datetime('now'))
        )
    "#,
    )
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_in_memory_is_available() {
        let store = LocalStore::open(":memory:").await;
        assert!(store.is_available());
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let store = LocalStore::open(":memory:").await;
        assert!(store.initialize().await);
        assert!(store.initialize().await);
        assert!(store.is_available());
    }

    #[tokio::test]
    async fn test_unopenable_path_degrades_to_unavailable() {
        let store = LocalStore::open("/nonexistent-newsdesk-dir/sub/store.db").await;
        assert!(!store.is_available());
        assert!(!store.initialize().await);
        assert!(matches!(store.pool(), Err(StorageError::Unavailable)));
    }

    #[tokio::test]
    async fn test_file_backed_store_reopens() {
        let dir = std::env::temp_dir().join("newsdesk_schema_test_reopen");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("store.db");
        let path = path.to_str().unwrap();

        let first = LocalStore::open(path).await;
        assert!(first.is_available());
        drop(first);

        let second = LocalStore::open(path).await;
        assert!(second.is_available());

        std::fs::remove_dir_all(&dir).ok();
    }
}
