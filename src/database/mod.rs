use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, Sqlite, SqlitePool, migrate::MigrateDatabase};
use tracing::{debug, info};

use crate::traits::KeyValueStore;

/// SQLite-backed key-value store with per-entry expiry
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(db_url: &str) -> Result<Self> {
        if let Some(dir) = db_url
            .strip_prefix("sqlite:")
            .map(|path| path.trim_start_matches("//"))
            .and_then(|path| std::path::Path::new(path).parent())
            .filter(|dir| !dir.as_os_str().is_empty())
        {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }

        // Create database file if it doesn't exist
        if !Sqlite::database_exists(db_url).await.unwrap_or(false) {
            info!("Creating database file");
            Sqlite::create_database(db_url)
                .await
                .with_context(|| format!("Failed to create database {db_url}"))?;
        }

        let pool = SqlitePool::connect(db_url)
            .await
            .with_context(|| format!("Failed to connect to {db_url}"))?;

        Self::migrate(pool).await
    }

    /// Private in-memory database on a single long-lived connection
    #[cfg(test)]
    pub async fn in_memory() -> Result<Self> {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        Self::migrate(pool).await
    }

    async fn migrate(pool: SqlitePool) -> Result<Self> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations").run(&pool).await?;

        info!("Database initialized successfully");
        Ok(Self { pool })
    }

    /// Delete entries whose TTL has elapsed, returning how many were removed
    pub async fn purge_expired(&self) -> Result<u64> {
        let result =
            sqlx::query("DELETE FROM kv_entries WHERE expires_at IS NOT NULL AND expires_at <= ?")
                .bind(Utc::now().timestamp())
                .execute(&self.pool)
                .await?;

        debug!("Purged {} expired entries", result.rows_affected());
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl KeyValueStore for Database {
    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        // GLOB is case-sensitive and shares `*`/`?` semantics with the pattern syntax
        let rows = sqlx::query(
            r"
            SELECT key FROM kv_entries
            WHERE key GLOB ? AND (expires_at IS NULL OR expires_at > ?)
            ORDER BY key
            ",
        )
        .bind(pattern)
        .bind(Utc::now().timestamp())
        .fetch_all(&self.pool)
        .await?;

        let keys = rows
            .into_iter()
            .map(|row| row.get::<String, _>("key"))
            .collect();

        Ok(keys)
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query(
            r"
            SELECT value FROM kv_entries
            WHERE key = ? AND (expires_at IS NULL OR expires_at > ?)
            ",
        )
        .bind(key)
        .bind(Utc::now().timestamp())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| row.get::<String, _>("value")))
    }

    async fn set(&self, key: &str, value: &str, ttl_seconds: Option<u64>) -> Result<()> {
        let expires_at = ttl_seconds.map(|ttl| {
            Utc::now()
                .timestamp()
                .saturating_add(i64::try_from(ttl).unwrap_or(i64::MAX))
        });

        sqlx::query(
            r"
            INSERT INTO kv_entries (key, value, expires_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at
            ",
        )
        .bind(key)
        .bind(value)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
