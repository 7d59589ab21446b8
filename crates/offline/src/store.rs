//! Durable key-value storage for the mirror record.
//!
//! The mirror lives in a single record under a fixed key. Every record carries
//! a version; writers replace it with a compare-and-swap on that version so a
//! concurrent writer is detected instead of silently overwritten. Each replace
//! is one statement, so readers never observe a half-written record.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use thiserror::Error;

/// A stored blob together with its record version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedBlob {
    pub data: String,
    pub version: u64,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage backend error: {0}")]
    Backend(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("concurrent write detected for key '{0}'")]
    Conflict(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

/// Host key-value storage with versioned, atomic replace.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Load the current blob for `key`, if any.
    async fn get(&self, key: &str) -> Result<Option<VersionedBlob>, StoreError>;

    /// Replace the blob for `key` if its version still equals `expected`
    /// (`None` = the key must be absent). Returns the new version, or
    /// `StoreError::Conflict` when another writer got there first.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<u64>,
        data: String,
    ) -> Result<u64, StoreError>;
}

/// In-memory store.
///
/// Intended for tests/dev. Contents are lost with the process.
#[derive(Debug, Default)]
pub struct InMemoryKeyValueStore {
    entries: RwLock<HashMap<String, VersionedBlob>>,
}

impl InMemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite `key` with raw data, bypassing version checks.
    pub fn put_raw(&self, key: &str, data: impl Into<String>) {
        let mut entries = self
            .entries
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let version = entries.get(key).map(|b| b.version + 1).unwrap_or(1);
        entries.insert(
            key.to_string(),
            VersionedBlob {
                data: data.into(),
                version,
            },
        );
    }
}

#[async_trait]
impl KeyValueStore for InMemoryKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<VersionedBlob>, StoreError> {
        let entries = self
            .entries
            .read()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))?;
        Ok(entries.get(key).cloned())
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<u64>,
        data: String,
    ) -> Result<u64, StoreError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))?;

        let current = entries.get(key).map(|b| b.version);
        if current != expected {
            return Err(StoreError::Conflict(key.to_string()));
        }

        let version = current.map(|v| v + 1).unwrap_or(1);
        entries.insert(key.to_string(), VersionedBlob { data, version });
        Ok(version)
    }
}

/// SQLite-backed store (the durable default).
#[derive(Debug, Clone)]
pub struct SqliteKeyValueStore {
    pool: SqlitePool,
}

impl SqliteKeyValueStore {
    /// Open (creating if needed) the database at `path`.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Backend(format!("failed to create directory {parent:?}: {e}"))
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        Self::with_pool(pool).await
    }

    /// A private in-memory database (single connection, kept alive).
    pub async fn in_memory() -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS kv_records (
                key        TEXT PRIMARY KEY,
                data       TEXT NOT NULL,
                version    INTEGER NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl KeyValueStore for SqliteKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<VersionedBlob>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT data, version
            FROM kv_records
            WHERE key = ?1
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        let row = match row {
            Some(row) => row,
            None => return Ok(None),
        };

        let data: String = row.try_get("data")?;
        let version: i64 = row.try_get("version")?;
        Ok(Some(VersionedBlob {
            data,
            version: version as u64,
        }))
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<u64>,
        data: String,
    ) -> Result<u64, StoreError> {
        let now = Utc::now().to_rfc3339();

        let result = match expected {
            None => {
                sqlx::query(
                    r#"
                    INSERT INTO kv_records (key, data, version, updated_at)
                    VALUES (?1, ?2, 1, ?3)
                    ON CONFLICT(key) DO NOTHING
                    "#,
                )
                .bind(key)
                .bind(&data)
                .bind(&now)
                .execute(&self.pool)
                .await?
            }
            Some(version) => {
                sqlx::query(
                    r#"
                    UPDATE kv_records
                    SET data = ?2,
                        version = version + 1,
                        updated_at = ?3
                    WHERE key = ?1
                      AND version = ?4
                    "#,
                )
                .bind(key)
                .bind(&data)
                .bind(&now)
                .bind(version as i64)
                .execute(&self.pool)
                .await?
            }
        };

        if result.rows_affected() != 1 {
            return Err(StoreError::Conflict(key.to_string()));
        }

        Ok(expected.map(|v| v + 1).unwrap_or(1))
    }
}

/// Resolve the default database path: `{app_data_dir}/stocktrack/offline.db`.
pub fn default_db_path() -> Option<PathBuf> {
    let mut dir = dirs::data_dir().or_else(|| {
        dirs::home_dir().map(|mut h| {
            h.push(".local");
            h.push("share");
            h
        })
    })?;
    dir.push("stocktrack");
    dir.push("offline.db");
    Some(dir)
}
