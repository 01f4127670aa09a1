//! C12 collaborator — sqlite-backed `PersistStore` (SPEC_FULL.md §6 AMBIENT).
//! Mirrors the teacher's `Database`/`repositories` split: a thin pool wrapper
//! that owns schema setup, and a repository-shaped adapter over one table.
//! The Redis-shaped key layout from spec.md §6 is realized as rows of
//! `kv_store(key, value, expires_at)`, with TTL enforced at read time.

use crate::domain::errors::TransientNetworkError;
use crate::domain::ports::PersistStore;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::Path;
use std::str::FromStr;
use tracing::info;

#[derive(Clone)]
pub struct Database {
    pub pool: SqlitePool,
}

impl Database {
    pub async fn new(db_url: &str) -> Result<Self> {
        if let Some(path_part) = db_url.strip_prefix("sqlite://")
            && let Some(parent) = Path::new(path_part).parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .context("failed to create database directory")?;
        }

        let options = SqliteConnectOptions::from_str(db_url)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("failed to connect to sqlite database")?;

        info!(%db_url, "Database: connected");
        let db = Self { pool };
        db.init().await?;
        Ok(db)
    }

    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS kv_store (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                expires_at INTEGER
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to create kv_store table")?;
        Ok(())
    }
}

/// `dhan_scalper:v1` namespace (spec.md §6) over the single `kv_store` table.
pub struct SqlitePersistStore {
    pool: SqlitePool,
}

impl SqlitePersistStore {
    pub fn new(db: &Database) -> Self {
        Self { pool: db.pool.clone() }
    }
}

#[async_trait]
impl PersistStore for SqlitePersistStore {
    async fn set(&self, key: &str, value: &str, ttl_seconds: Option<i64>) -> Result<(), TransientNetworkError> {
        let expires_at = ttl_seconds.map(|ttl| Utc::now().timestamp() + ttl);
        sqlx::query(
            r#"
            INSERT INTO kv_store (key, value, expires_at) VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(|e| TransientNetworkError::Store(e.to_string()))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, TransientNetworkError> {
        let row = sqlx::query("SELECT value, expires_at FROM kv_store WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| TransientNetworkError::Store(e.to_string()))?;

        let Some(row) = row else { return Ok(None) };
        let expires_at: Option<i64> = row.try_get("expires_at").map_err(|e| TransientNetworkError::Store(e.to_string()))?;
        if let Some(expires_at) = expires_at
            && expires_at < Utc::now().timestamp()
        {
            let _ = self.delete(key).await;
            return Ok(None);
        }
        let value: String = row.try_get("value").map_err(|e| TransientNetworkError::Store(e.to_string()))?;
        Ok(Some(value))
    }

    async fn delete(&self, key: &str) -> Result<(), TransientNetworkError> {
        sqlx::query("DELETE FROM kv_store WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|e| TransientNetworkError::Store(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let db = Database::new("sqlite::memory:").await.unwrap();
        let store = SqlitePersistStore::new(&db);
        store.set("dhan_scalper:v1:balance", "{\"available\":100}", None).await.unwrap();
        let got = store.get("dhan_scalper:v1:balance").await.unwrap();
        assert_eq!(got, Some("{\"available\":100}".to_string()));
    }

    #[tokio::test]
    async fn expired_key_reads_as_absent() {
        let db = Database::new("sqlite::memory:").await.unwrap();
        let store = SqlitePersistStore::new(&db);
        store.set("dhan_scalper:v1:dedupe:x", "1", Some(-1)).await.unwrap();
        assert_eq!(store.get("dhan_scalper:v1:dedupe:x").await.unwrap(), None);
    }

    #[tokio::test]
    async fn missing_key_is_none() {
        let db = Database::new("sqlite::memory:").await.unwrap();
        let store = SqlitePersistStore::new(&db);
        assert_eq!(store.get("dhan_scalper:v1:nope").await.unwrap(), None);
    }
}
