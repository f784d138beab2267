//! SQLite-backed local model store.
//!
//! One row per key in `model_cache(key, blob, updated_at)`. Keys already carry
//! the tenant (`tenant/{id}/...`), so tenant isolation comes from key
//! construction in `modelforge-ai`.

use std::path::Path;
use std::str::FromStr;

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tracing::debug;

use modelforge_ai::{ModelKey, ModelStore, StoreError};
use modelforge_core::TenantId;

#[derive(Debug, Clone)]
pub struct SqliteModelStore {
    pool: SqlitePool,
}

impl SqliteModelStore {
    /// Open (or create) the database file at `path` and its schema.
    pub async fn connect(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create model cache directory at {parent:?}"))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .with_context(|| format!("failed to open model cache at {path:?}"))?;

        Self::from_pool(pool).await
    }

    /// Private in-memory database (tests/dev).
    ///
    /// Pinned to a single connection that never expires, since every SQLite
    /// in-memory connection is its own database.
    pub async fn in_memory() -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .context("invalid in-memory SQLite URL")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .context("failed to open in-memory model cache")?;

        Self::from_pool(pool).await
    }

    pub async fn from_pool(pool: SqlitePool) -> anyhow::Result<Self> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS model_cache (
                key        TEXT PRIMARY KEY NOT NULL,
                blob       BLOB NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await
        .context("failed to create model_cache table")?;

        Ok(Self { pool })
    }

    /// Keys under `prefix`, sorted.
    pub async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let rows = sqlx::query("SELECT key FROM model_cache WHERE substr(key, 1, ?1) = ?2 ORDER BY key")
            .bind(prefix.chars().count() as i64)
            .bind(prefix)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("keys_with_prefix", e))?;

        rows.iter()
            .map(|r| r.try_get::<String, _>("key"))
            .collect::<Result<_, _>>()
            .map_err(|e| map_sqlx_error("keys_with_prefix", e))
    }

    /// Drop every model and metadata entry of a tenant. Returns the number of
    /// removed keys.
    pub async fn clear_tenant(&self, tenant_id: TenantId) -> Result<u64, StoreError> {
        let prefix = ModelKey::tenant_prefix(tenant_id);
        let result = sqlx::query("DELETE FROM model_cache WHERE substr(key, 1, ?1) = ?2")
            .bind(prefix.chars().count() as i64)
            .bind(&prefix)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("clear_tenant", e))?;

        debug!(tenant = %tenant_id, removed = result.rows_affected(), "cleared tenant models");
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl ModelStore for SqliteModelStore {
    async fn set(&self, key: &str, blob: Vec<u8>) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO model_cache (key, blob, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET
                blob = excluded.blob,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(blob)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("set", e))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let row = sqlx::query("SELECT blob FROM model_cache WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get", e))?;

        match row {
            Some(row) => row
                .try_get::<Vec<u8>, _>("blob")
                .map(Some)
                .map_err(|e| map_sqlx_error("get", e)),
            None => Ok(None),
        }
    }
}

/// Connection-level failures are `Unavailable`; everything else is `Storage`.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::PoolClosed | sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => {
            StoreError::Unavailable(format!("{operation}: {err}"))
        }
        sqlx::Error::Database(db_err) => {
            StoreError::Storage(format!("database error in {operation}: {}", db_err.message()))
        }
        other => StoreError::Storage(format!("{operation}: {other}")),
    }
}
