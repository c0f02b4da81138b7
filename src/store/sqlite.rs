//! SQLite-backed key-value store.
//!
//! Persists cache entries, credentials and breaker state across restarts.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use tracing::debug;

use super::{KeyValueStore, StorageResult};

/// Open a database connection with proper concurrency settings.
fn open_db(db_path: &Path) -> rusqlite::Result<Connection> {
    let conn = Connection::open(db_path)?;
    configure(&conn)?;
    Ok(conn)
}

fn configure(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA busy_timeout = 30000;
    "#,
    )
}

/// Initialize the key-value table.
pub fn init_kv_table(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS kv_store (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        );
    "#,
    )
}

/// SQLite key-value store.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (and create if needed) a store at the given path.
    pub fn open(db_path: &Path) -> StorageResult<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = open_db(db_path)?;
        init_kv_table(&conn)?;
        debug!("Opened key-value store at {}", db_path.display());
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        init_kv_table(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl KeyValueStore for SqliteStore {
    async fn get(&self, key: &str) -> StorageResult<Option<Value>> {
        let raw: Option<String> = self
            .conn()
            .query_row(
                "SELECT value FROM kv_store WHERE key = ?",
                params![key],
                |row| row.get(0),
            )
            .optional()?;

        match raw {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &Value) -> StorageResult<()> {
        let text = serde_json::to_string(value)?;
        self.conn().execute(
            r#"INSERT OR REPLACE INTO kv_store (key, value, updated_at)
               VALUES (?, ?, ?)"#,
            params![key, text, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> StorageResult<()> {
        self.conn()
            .execute("DELETE FROM kv_store WHERE key = ?", params![key])?;
        Ok(())
    }

    async fn scan_prefix(&self, prefix: &str) -> StorageResult<Vec<(String, Value)>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT key, value FROM kv_store WHERE substr(key, 1, length(?1)) = ?1 ORDER BY key",
        )?;

        let rows = stmt.query_map(params![prefix], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (key, text) = row?;
            match serde_json::from_str(&text) {
                Ok(value) => entries.push((key, value)),
                Err(e) => debug!("Skipping undecodable value for {}: {}", key, e),
            }
        }
        Ok(entries)
    }

    async fn clear_except(&self, preserve: &[&str]) -> StorageResult<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let mut kept = Vec::new();
        for key in preserve {
            let value: Option<String> = tx
                .query_row(
                    "SELECT value FROM kv_store WHERE key = ?",
                    params![key],
                    |row| row.get(0),
                )
                .optional()?;
            if let Some(value) = value {
                kept.push((key.to_string(), value));
            }
        }

        tx.execute("DELETE FROM kv_store", [])?;
        for (key, value) in &kept {
            tx.execute(
                "INSERT INTO kv_store (key, value, updated_at) VALUES (?, ?, ?)",
                params![key, value, Utc::now().to_rfc3339()],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    async fn size_bytes(&self, prefix: &str) -> StorageResult<u64> {
        let total: i64 = self.conn().query_row(
            "SELECT COALESCE(SUM(length(key) + length(value)), 0) FROM kv_store
             WHERE substr(key, 1, length(?1)) = ?1",
            params![prefix],
            |row| row.get(0),
        )?;
        Ok(total.max(0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_persistence_across_opens() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("nested").join("whereabouts.db");

        {
            let store = SqliteStore::open(&db_path).unwrap();
            store
                .set("breaker.locked_until", &json!(1_700_000_000_000i64))
                .await
                .unwrap();
            store.set("u_alice", &json!({"x": 1})).await.unwrap();
        }

        {
            let store = SqliteStore::open(&db_path).unwrap();
            assert_eq!(
                store.get("breaker.locked_until").await.unwrap(),
                Some(json!(1_700_000_000_000i64))
            );
            assert_eq!(store.get("u_alice").await.unwrap(), Some(json!({"x": 1})));
        }
    }

    #[tokio::test]
    async fn test_scan_prefix_does_not_treat_underscore_as_wildcard() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.set("u_alice", &json!(1)).await.unwrap();
        store.set("ux_bob", &json!(2)).await.unwrap();
        store.set("u_carol", &json!(3)).await.unwrap();

        let keys: Vec<String> = store
            .scan_prefix("u_")
            .await
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec!["u_alice", "u_carol"]);
    }

    #[tokio::test]
    async fn test_clear_except_preserves_allow_list() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.set("u_alice", &json!(1)).await.unwrap();
        store.set("credentials.query_id", &json!("q")).await.unwrap();

        store
            .clear_except(&["credentials.query_id", "missing"])
            .await
            .unwrap();

        assert_eq!(store.get("u_alice").await.unwrap(), None);
        assert_eq!(
            store.get("credentials.query_id").await.unwrap(),
            Some(json!("q"))
        );
    }

    #[tokio::test]
    async fn test_size_bytes_tracks_contents() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert_eq!(store.size_bytes("").await.unwrap(), 0);
        store.set("ab", &json!("cd")).await.unwrap();
        assert_eq!(store.size_bytes("").await.unwrap(), 6);

        store.set("u_x", &json!(1)).await.unwrap();
        assert_eq!(store.size_bytes("u_").await.unwrap(), 4);
        assert_eq!(store.size_bytes("credentials.").await.unwrap(), 0);
    }
}
