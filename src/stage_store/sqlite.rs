use super::{StageStorage, StageStoreError};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use std::path::Path;
use tracing::info;

/// Stage storage backed by a SQLite file, for flows that outlive one process
#[derive(Debug, Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
    quota_bytes: usize,
}

impl SqliteStorage {
    /// Open (or create) the store at `path`
    pub async fn open(path: &Path, quota_bytes: usize) -> Result<Self, StageStoreError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StageStoreError::Backend(e.to_string()))?;
        }

        // Use sqlite:// with ?mode=rwc to create if it doesn't exist
        let database_url = format!("sqlite://{}?mode=rwc", path.display());
        info!("Connecting to {}", database_url);
        let pool = SqlitePool::connect(&database_url).await?;

        let storage = SqliteStorage { pool, quota_bytes };
        storage.create_tables().await?;
        Ok(storage)
    }

    /// Private in-memory database (single connection so every query sees it)
    pub async fn in_memory(quota_bytes: usize) -> Result<Self, StageStoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        let storage = SqliteStorage { pool, quota_bytes };
        storage.create_tables().await?;
        Ok(storage)
    }

    async fn create_tables(&self) -> Result<(), StageStoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS stage_artifacts (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl StageStorage for SqliteStorage {
    async fn get(&self, key: &str) -> Result<Option<String>, StageStoreError> {
        let row = sqlx::query("SELECT value FROM stage_artifacts WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(match row {
            Some(row) => Some(row.try_get("value")?),
            None => None,
        })
    }

    async fn put(&self, key: &str, value: &str) -> Result<(), StageStoreError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            "SELECT COALESCE(SUM(LENGTH(CAST(value AS BLOB))), 0) AS used FROM stage_artifacts WHERE key != ?",
        )
        .bind(key)
        .fetch_one(&mut *tx)
        .await?;
        let used_by_others: i64 = row.try_get("used")?;
        let available = self.quota_bytes.saturating_sub(used_by_others.max(0) as usize);

        if value.len() > available {
            // Dropping the transaction rolls it back
            return Err(StageStoreError::QuotaExceeded {
                requested: value.len(),
                available,
            });
        }

        sqlx::query(
            r#"
            INSERT INTO stage_artifacts (key, value, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StageStoreError> {
        sqlx::query("DELETE FROM stage_artifacts WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_values_persist_across_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("stage.db");

        let storage = SqliteStorage::open(&path, 1024).await.unwrap();
        storage.put("k", "first").await.unwrap();
        storage.put("k", "second").await.unwrap();
        drop(storage);

        let reopened = SqliteStorage::open(&path, 1024).await.unwrap();
        assert_eq!(reopened.get("k").await.unwrap().as_deref(), Some("second"));
        reopened.remove("k").await.unwrap();
        assert_eq!(reopened.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_quota_enforced_in_transaction() {
        let storage = SqliteStorage::in_memory(8).await.unwrap();
        storage.put("a", "1234").await.unwrap();
        storage.put("b", "1234").await.unwrap();

        let err = storage.put("b", "12345").await.unwrap_err();
        assert!(matches!(
            err,
            StageStoreError::QuotaExceeded { requested: 5, available: 4 }
        ));
        assert_eq!(storage.get("b").await.unwrap().as_deref(), Some("1234"));
    }
}
