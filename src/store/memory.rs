//! In-memory store for single-process operation.
//!
//! State is not persisted across restarts.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use super::{KeyValueStore, StorageResult};

/// In-memory key-value store.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<RwLock<BTreeMap<String, Value>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> StorageResult<Option<Value>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &Value) -> StorageResult<()> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), value.clone());
        Ok(())
    }

    async fn remove(&self, key: &str) -> StorageResult<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn scan_prefix(&self, prefix: &str) -> StorageResult<Vec<(String, Value)>> {
        let entries = self.entries.read().await;
        Ok(entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    async fn clear_except(&self, preserve: &[&str]) -> StorageResult<()> {
        self.entries
            .write()
            .await
            .retain(|k, _| preserve.contains(&k.as_str()));
        Ok(())
    }

    async fn size_bytes(&self, prefix: &str) -> StorageResult<u64> {
        let entries = self.entries.read().await;
        Ok(entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.len() + v.to_string().len()) as u64)
            .sum())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_set_get_remove() {
        let store = MemoryStore::new();
        store.set("a", &json!({"x": 1})).await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), Some(json!({"x": 1})));

        store.remove("a").await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_scan_prefix_is_ordered_and_bounded() {
        let store = MemoryStore::new();
        store.set("u_bob", &json!(2)).await.unwrap();
        store.set("u_alice", &json!(1)).await.unwrap();
        store.set("v_other", &json!(3)).await.unwrap();
        store.set("credentials.query_id", &json!("q")).await.unwrap();

        let keys: Vec<String> = store
            .scan_prefix("u_")
            .await
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec!["u_alice", "u_bob"]);
    }

    #[tokio::test]
    async fn test_clear_except_keeps_allow_list() {
        let store = MemoryStore::new();
        store.set("u_alice", &json!(1)).await.unwrap();
        store.set("keep", &json!("yes")).await.unwrap();

        store.clear_except(&["keep"]).await.unwrap();

        assert_eq!(store.len().await, 1);
        assert_eq!(store.get("keep").await.unwrap(), Some(json!("yes")));
    }

    #[tokio::test]
    async fn test_size_bytes() {
        let store = MemoryStore::new();
        assert_eq!(store.size_bytes("").await.unwrap(), 0);
        store.set("ab", &json!("cd")).await.unwrap();
        // key (2) + serialized "\"cd\"" (4)
        assert_eq!(store.size_bytes("").await.unwrap(), 6);

        store.set("u_x", &json!(1)).await.unwrap();
        assert_eq!(store.size_bytes("u_").await.unwrap(), 4);
        assert_eq!(store.size_bytes("").await.unwrap(), 10);
    }
}
