//! Small SQLite-backed key-value store for device-local settings and counters

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use tracing::info;

#[derive(Debug, Clone)]
pub struct KeyValueStore {
    pool: SqlitePool,
}

impl KeyValueStore {
    /// Opens (creating if needed) the database at `database_url`
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| StoreError::DatabaseError(e.to_string()))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::DatabaseError(e.to_string()))?;

        let store = Self { pool };
        store.migrate().await?;

        info!(database_url = %database_url, "Opened key-value store");
        Ok(store)
    }

    /// In-memory store, used by tests and when no database is configured
    pub async fn in_memory() -> Result<Self, StoreError> {
        Self::connect("sqlite::memory:").await
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY NOT NULL,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::DatabaseError(e.to_string()))?;

        Ok(())
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        sqlx::query_scalar::<_, String>("SELECT value FROM kv WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::DatabaseError(e.to_string()))
    }

    /// Atomically adds one to the integer stored under `key` (missing = 0)
    /// and returns the new value
    pub async fn increment(&self, key: &str) -> Result<i64, StoreError> {
        let value: String = sqlx::query_scalar(
            r#"
            INSERT INTO kv (key, value, updated_at)
            VALUES (?, '1', datetime('now'))
            ON CONFLICT(key) DO UPDATE SET
                value = CAST(CAST(kv.value AS INTEGER) + 1 AS TEXT),
                updated_at = datetime('now')
            RETURNING value
            "#,
        )
        .bind(key)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::DatabaseError(e.to_string()))?;

        value
            .parse()
            .map_err(|_| StoreError::CorruptValue(key.to_string()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("Stored value for {0} is not a number")]
    CorruptValue(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_key_reads_as_none() {
        let store = KeyValueStore::in_memory().await.unwrap();
        assert_eq!(store.get("api_request_count:2026-10-16").await.unwrap(), None);
    }

    #[tokio::test]
    async fn increment_counts_from_one() {
        let store = KeyValueStore::in_memory().await.unwrap();

        assert_eq!(store.increment("requests").await.unwrap(), 1);
        assert_eq!(store.increment("requests").await.unwrap(), 2);
        assert_eq!(store.increment("requests").await.unwrap(), 3);
        assert_eq!(store.get("requests").await.unwrap().as_deref(), Some("3"));
    }
}
