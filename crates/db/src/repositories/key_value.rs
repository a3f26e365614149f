use tracing::info;

use super::{KeyValueStore, RepositoryError};
use crate::DbPool;

/// Durable store over the `storage(key TEXT PRIMARY KEY, value TEXT)` table.
///
/// The table is created by [`crate::migrations::run_pending`]; callers are
/// expected to migrate the pool before handing it over.
pub struct SqlKeyValueStore {
    pool: DbPool,
}

impl SqlKeyValueStore {
    pub fn new(pool: DbPool) -> Self {
        info!(event_name = "storage.sqlite.initialized", "sqlite key-value store initialized");
        Self { pool }
    }
}

#[async_trait::async_trait]
impl KeyValueStore for SqlKeyValueStore {
    async fn set(&self, key: &str, value: &str) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO storage (key, value) VALUES (?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, RepositoryError> {
        let value: Option<Option<String>> =
            sqlx::query_scalar("SELECT value FROM storage WHERE key = ?")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;
        Ok(value.map(Option::unwrap_or_default))
    }

    async fn get_all(&self) -> Result<Vec<String>, RepositoryError> {
        self.values().await
    }

    async fn delete(&self, key: &str) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM storage WHERE key = ?").bind(key).execute(&self.pool).await?;
        Ok(())
    }

    async fn clear(&self) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM storage").execute(&self.pool).await?;
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, RepositoryError> {
        let keys = sqlx::query_scalar("SELECT key FROM storage").fetch_all(&self.pool).await?;
        Ok(keys)
    }

    async fn values(&self) -> Result<Vec<String>, RepositoryError> {
        let values: Vec<Option<String>> =
            sqlx::query_scalar("SELECT value FROM storage").fetch_all(&self.pool).await?;
        Ok(values.into_iter().map(Option::unwrap_or_default).collect())
    }

    async fn items(&self) -> Result<Vec<(String, String)>, RepositoryError> {
        let rows: Vec<(String, Option<String>)> =
            sqlx::query_as("SELECT key, value FROM storage").fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(|(key, value)| (key, value.unwrap_or_default())).collect())
    }

    async fn len(&self) -> Result<usize, RepositoryError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM storage").fetch_one(&self.pool).await?;
        usize::try_from(count)
            .map_err(|_| RepositoryError::Decode(format!("negative row count {count}")))
    }

    async fn contains(&self, key: &str) -> Result<bool, RepositoryError> {
        let hit: Option<i64> = sqlx::query_scalar("SELECT 1 FROM storage WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(hit.is_some())
    }
}
