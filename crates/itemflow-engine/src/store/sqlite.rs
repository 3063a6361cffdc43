//! Embedded SQLite adapter (`sqlite://<path>`).
//!
//! `sqlite://` with no path opens a private in-memory database.

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::error::{EngineError, EngineResult};
use crate::store::adapter::{location, Adapter, AdapterInit, PendingAdapter, StateEntry};

const CREATE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS state_entries (
    namespace  TEXT    NOT NULL,
    key        TEXT    NOT NULL,
    value      BLOB    NOT NULL,
    expires_at INTEGER,
    PRIMARY KEY (namespace, key)
)"#;

/// SQLite-backed adapter using a single-connection sqlx pool.
pub struct SqliteAdapter {
    pool: SqlitePool,
}

impl SqliteAdapter {
    /// Open the database at `path` (empty for in-memory) and ensure the schema.
    pub async fn connect(path: &str) -> EngineResult<Self> {
        let in_memory = path.is_empty();
        let options = if in_memory {
            SqliteConnectOptions::from_str("sqlite::memory:")?
        } else {
            SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true)
        };
        let options = options.busy_timeout(Duration::from_secs(5));

        // A single connection serializes writes; for in-memory databases it
        // must also never be recycled or the data is gone.
        let mut pool_options = SqlitePoolOptions::new().max_connections(1);
        if in_memory {
            pool_options = pool_options.idle_timeout(None).max_lifetime(None);
        }
        let pool = pool_options.connect_with(options).await?;

        sqlx::query(CREATE_TABLE).execute(&pool).await?;

        let display_path = if in_memory { ":memory:" } else { path };
        tracing::debug!(path = %display_path, "SQLite state store ready");

        Ok(Self { pool })
    }
}

pub(crate) fn factory(url: &Url) -> EngineResult<AdapterInit> {
    let path = location(url)?;
    let pending: PendingAdapter = Box::pin(async move {
        let adapter = SqliteAdapter::connect(&path).await?;
        Ok::<Arc<dyn Adapter>, EngineError>(Arc::new(adapter))
    });
    Ok(AdapterInit::Pending(pending))
}

#[async_trait]
impl Adapter for SqliteAdapter {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn get(&self, namespace: &str, key: &str) -> EngineResult<Option<StateEntry>> {
        let row = sqlx::query("SELECT value, expires_at FROM state_entries WHERE namespace = ? AND key = ?")
            .bind(namespace)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let value: Vec<u8> = row.try_get("value")?;
                let expires_at: Option<i64> = row.try_get("expires_at")?;
                Ok(Some(StateEntry { value, expires_at }))
            }
            None => Ok(None),
        }
    }

    async fn set(&self, namespace: &str, key: &str, entry: StateEntry) -> EngineResult<()> {
        sqlx::query(
            r#"INSERT INTO state_entries (namespace, key, value, expires_at)
               VALUES (?, ?, ?, ?)
               ON CONFLICT (namespace, key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at"#,
        )
        .bind(namespace)
        .bind(key)
        .bind(entry.value)
        .bind(entry.expires_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete(&self, namespace: &str, key: &str) -> EngineResult<bool> {
        let result = sqlx::query("DELETE FROM state_entries WHERE namespace = ? AND key = ?")
            .bind(namespace)
            .bind(key)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn clear(&self, namespace: &str) -> EngineResult<()> {
        sqlx::query("DELETE FROM state_entries WHERE namespace = ?")
            .bind(namespace)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn keys(&self, namespace: &str) -> EngineResult<Vec<String>> {
        let rows = sqlx::query("SELECT key FROM state_entries WHERE namespace = ? ORDER BY key")
            .bind(namespace)
            .fetch_all(&self.pool)
            .await?;

        let mut keys: Vec<String> = Vec::with_capacity(rows.len());
        for row in &rows {
            keys.push(row.try_get("key")?);
        }
        Ok(keys)
    }

    async fn delete_expired(&self, namespace: &str, now_ms: i64) -> EngineResult<usize> {
        let result = sqlx::query(
            "DELETE FROM state_entries WHERE namespace = ? AND expires_at IS NOT NULL AND expires_at <= ?",
        )
        .bind(namespace)
        .bind(now_ms)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_crud() {
        let adapter = SqliteAdapter::connect("").await.unwrap();
        adapter.set("ns", "b", StateEntry::new(b"2".to_vec())).await.unwrap();
        adapter.set("ns", "a", StateEntry::new(b"1".to_vec())).await.unwrap();
        adapter.set("ns", "a", StateEntry::new(b"3".to_vec())).await.unwrap();

        assert_eq!(adapter.get("ns", "a").await.unwrap().unwrap().value, b"3");
        assert_eq!(adapter.keys("ns").await.unwrap(), vec!["a", "b"]);
        assert!(adapter.delete("ns", "a").await.unwrap());
        assert!(!adapter.delete("ns", "a").await.unwrap());

        adapter.clear("ns").await.unwrap();
        assert!(adapter.keys("ns").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_file_database_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.db");
        let path = path.to_str().unwrap();

        let adapter = SqliteAdapter::connect(path).await.unwrap();
        adapter.set("ns", "k", StateEntry::new(b"v".to_vec())).await.unwrap();
        drop(adapter);

        let reopened = SqliteAdapter::connect(path).await.unwrap();
        assert!(reopened.get("ns", "k").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_delete_expired() {
        let adapter = SqliteAdapter::connect("").await.unwrap();
        adapter
            .set("ns", "old", StateEntry::new(vec![0]).with_expiry(Some(5)))
            .await
            .unwrap();
        adapter
            .set("ns", "new", StateEntry::new(vec![0]).with_expiry(Some(50)))
            .await
            .unwrap();

        assert_eq!(adapter.delete_expired("ns", 10).await.unwrap(), 1);
        assert_eq!(adapter.keys("ns").await.unwrap(), vec!["new"]);
    }
}
