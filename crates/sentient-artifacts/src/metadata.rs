//! SQLite-based metadata for cached artifacts, one record per cache key.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use sentient_core::{RusqliteErrorExt, StorageError};
use std::path::Path;
use std::sync::Arc;

use crate::key::CacheKey;

/// Which artifact a cache key points at, and when it was generated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub key: CacheKey,
    /// File name in artifact storage
    pub artifact: String,
    pub created_at: DateTime<Utc>,
}

#[cfg_attr(any(test, feature = "mocks"), mockall::automock)]
#[async_trait]
pub trait CacheMetadataStore: Send + Sync {
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, StorageError>;

    /// Insert or replace the entry for `entry.key`.
    async fn put(&self, entry: &CacheEntry) -> Result<(), StorageError>;

    async fn delete(&self, key: &CacheKey) -> Result<(), StorageError>;

    /// Delete the entry for `key` only if it still references `artifact`.
    ///
    /// Returns whether an entry was removed. Eviction uses this so an entry
    /// rewritten by a concurrent store is left alone.
    async fn remove_artifact(&self, key: &CacheKey, artifact: &str) -> Result<bool, StorageError>;

    async fn list_all(&self) -> Result<Vec<CacheEntry>, StorageError>;
}

/// Metadata store backed by SQLite.
///
/// The connection is shared behind a mutex and all queries run on the
/// blocking thread pool.
#[derive(Clone)]
pub struct SqliteMetadataStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteMetadataStore {
    /// Open (or create) the metadata database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StorageError::Unavailable(format!("{}: {}", parent.display(), e)))?;
        }
        let conn = Connection::open(path).map_err(RusqliteErrorExt::into_storage_error)?;
        Self::with_connection(conn)
    }

    /// Create an in-memory store (for tests and throwaway runs).
    pub fn in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory().map_err(RusqliteErrorExt::into_storage_error)?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self, StorageError> {
        Self::init_schema(&conn).map_err(RusqliteErrorExt::into_storage_error)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Initialize the database schema.
    fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS cache_entries (
                cache_key TEXT PRIMARY KEY,
                artifact TEXT NOT NULL,
                created_at_ms INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_cache_entries_artifact ON cache_entries(artifact);
            "#,
        )
    }

    /// Run `op` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, op: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || op(&conn.lock()))
            .await
            .map_err(|e| StorageError::Unavailable(format!("metadata task failed: {}", e)))?
            .map_err(RusqliteErrorExt::into_storage_error)
    }

    fn row_to_entry(row: &rusqlite::Row) -> rusqlite::Result<CacheEntry> {
        let created_at_ms: i64 = row.get(2)?;
        let created_at = DateTime::from_timestamp_millis(created_at_ms).ok_or_else(|| {
            rusqlite::Error::IntegralValueOutOfRange(2, created_at_ms)
        })?;

        Ok(CacheEntry {
            key: CacheKey::from_stored(row.get::<_, String>(0)?),
            artifact: row.get(1)?,
            created_at,
        })
    }
}

#[async_trait]
impl CacheMetadataStore for SqliteMetadataStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, StorageError> {
        let key = key.as_str().to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT cache_key, artifact, created_at_ms FROM cache_entries WHERE cache_key = ?1",
                params![key],
                Self::row_to_entry,
            )
            .optional()
        })
        .await
    }

    async fn put(&self, entry: &CacheEntry) -> Result<(), StorageError> {
        let entry = entry.clone();
        self.with_conn(move |conn| {
            conn.execute(
                r#"
                INSERT OR REPLACE INTO cache_entries (cache_key, artifact, created_at_ms)
                VALUES (?1, ?2, ?3)
                "#,
                params![
                    entry.key.as_str(),
                    entry.artifact,
                    entry.created_at.timestamp_millis()
                ],
            )
            .map(|_| ())
        })
        .await
    }

    async fn delete(&self, key: &CacheKey) -> Result<(), StorageError> {
        let key = key.as_str().to_string();
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM cache_entries WHERE cache_key = ?1", params![key])
                .map(|_| ())
        })
        .await
    }

    async fn remove_artifact(&self, key: &CacheKey, artifact: &str) -> Result<bool, StorageError> {
        let key = key.as_str().to_string();
        let artifact = artifact.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "DELETE FROM cache_entries WHERE cache_key = ?1 AND artifact = ?2",
                params![key, artifact],
            )
            .map(|removed| removed > 0)
        })
        .await
    }

    async fn list_all(&self) -> Result<Vec<CacheEntry>, StorageError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT cache_key, artifact, created_at_ms FROM cache_entries ORDER BY created_at_ms DESC, cache_key",
            )?;
            let rows = stmt.query_map([], Self::row_to_entry)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })
        .await
    }
}
