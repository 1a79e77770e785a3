use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::schema::LocalStore;

pub(crate) const LAST_UPDATE_ID: &str = "last_update_id";
pub(crate) const LAST_SYNC_TIME: &str = "last_sync_time";

/// In-memory key-value mirror of the cursor record.
///
/// Consulted before `sync_metadata` on every cursor read. It is only a
/// cache: an empty or evicted mirror falls through to the table and is
/// repopulated from it.
///
/// Every write bumps `version`. A table read that started before a write
/// must not put its older value back, so refills go through
/// [`CursorMirror::fill_if_unchanged`].
#[derive(Clone)]
pub(crate) struct CursorMirror {
    state: Arc<Mutex<MirrorState>>,
}

struct MirrorState {
    entries: LruCache<&'static str, String>,
    version: u64,
}

impl CursorMirror {
    const CAPACITY: NonZeroUsize = match NonZeroUsize::new(8) {
        Some(n) => n,
        None => unreachable!(),
    };

    pub(crate) fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MirrorState {
                entries: LruCache::new(Self::CAPACITY),
                version: 0,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MirrorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[cfg(test)]
    pub(crate) fn get(&self, key: &'static str) -> Option<String> {
        self.lookup(key).ok()
    }

    /// Mirrored value, or the current version on a miss.
    pub(crate) fn lookup(&self, key: &'static str) -> Result<String, u64> {
        let mut state = self.lock();
        match state.entries.get(&key) {
            Some(value) => Ok(value.clone()),
            None => Err(state.version),
        }
    }

    pub(crate) fn set(&self, key: &'static str, value: &str) {
        let mut state = self.lock();
        state.entries.put(key, value.to_string());
        state.version = state.version.wrapping_add(1);
    }

    /// Store a value read from the table, unless the mirror was written
    /// since `seen` was taken. Returns whether the value was stored.
    pub(crate) fn fill_if_unchanged(&self, key: &'static str, value: &str, seen: u64) -> bool {
        let mut state = self.lock();
        if state.version != seen {
            return false;
        }
        state.entries.put(key, value.to_string());
        true
    }

    /// Drop every mirrored value (cold start / eviction).
    pub(crate) fn clear(&self) {
        let mut state = self.lock();
        state.entries.clear();
        state.version = state.version.wrapping_add(1);
    }
}

impl LocalStore {
    // ========================================================================
    // Cursor Operations
    // ========================================================================

    /// Current sync cursor, or `None` if nothing has been synced or the store
    /// is unavailable.
    ///
    /// Reads the mirror first and falls back to the `sync_metadata` row.
    pub async fn get_last_update_id(&self) -> Option<String> {
        self.read_cursor_key(LAST_UPDATE_ID).await
    }

    /// Local time of the last committed replace.
    pub async fn get_last_sync_time(&self) -> Option<String> {
        self.read_cursor_key(LAST_SYNC_TIME).await
    }

    /// Forget the mirrored cursor so the next read goes to the table.
    pub fn evict_cursor_mirror(&self) {
        self.mirror.clear();
    }

    async fn read_cursor_key(&self, key: &'static str) -> Option<String> {
        let pool = match self.pool() {
            Ok(pool) => pool,
            Err(_) => {
                tracing::debug!(key, "Local store unavailable, no cursor");
                return None;
            }
        };

        let seen = match self.mirror.lookup(key) {
            Ok(value) => return Some(value),
            Err(version) => version,
        };

        let row: Result<Option<(String,)>, sqlx::Error> =
            sqlx::query_as("SELECT value FROM sync_metadata WHERE key = ?")
                .bind(key)
                .fetch_optional(pool)
                .await;

        match row {
            Ok(Some((value,))) => {
                if self.mirror.fill_if_unchanged(key, &value, seen) {
                    tracing::trace!(key, "Cursor mirror miss, repopulated from sync_metadata");
                } else {
                    tracing::trace!(key, "Cursor changed during table read, mirror left as is");
                }
                Some(value)
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(key, error = %e, "Failed to read sync metadata");
                None
            }
        }
    }
}
