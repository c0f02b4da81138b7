//! Fail-soft cache of lookup results.
//!
//! Read and write errors are logged and degrade to a miss or a dropped write;
//! they never reach lookup callers.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use super::KeyValueStore;
use crate::models::{decode_stored_entry, CacheEntry, LookupResult, StoredEntry, ValueCount};

/// Store key prefix for cached lookups.
pub const CACHE_KEY_PREFIX: &str = "u_";

/// Cache of lookup results keyed by account handle.
#[derive(Clone)]
pub struct CacheStore {
    store: Arc<dyn KeyValueStore>,
}

impl CacheStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    fn store_key(key: &str) -> String {
        format!("{}{}", CACHE_KEY_PREFIX, key)
    }

    /// Read an entry. Legacy documents are normalized and rewritten once.
    pub async fn get(&self, key: &str) -> Option<CacheEntry> {
        let store_key = Self::store_key(key);
        let raw = match self.store.get(&store_key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!("Cache read error for @{}: {}", key, e);
                return None;
            }
        };

        match decode_stored_entry(&raw) {
            Some(StoredEntry::Current(entry)) => Some(entry),
            Some(StoredEntry::Legacy(entry)) => {
                debug!("Migrating legacy cache entry for @{}", key);
                self.put_entry(key, &entry).await;
                Some(entry)
            }
            None => {
                debug!("Ignoring unrecognized cache entry for @{}", key);
                None
            }
        }
    }

    /// Write a result stamped with the current time.
    pub async fn set(&self, key: &str, value: &LookupResult) {
        self.put_entry(key, &CacheEntry::new(value.clone())).await;
    }

    /// Write an entry with its own timestamp.
    pub async fn put_entry(&self, key: &str, entry: &CacheEntry) {
        let raw = match serde_json::to_value(entry) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Cache encode error for @{}: {}", key, e);
                return;
            }
        };
        if let Err(e) = self.store.set(&Self::store_key(key), &raw).await {
            warn!("Cache write error for @{}: {}", key, e);
        }
    }

    /// All decodable entries (legacy shapes included), keyed by handle.
    pub async fn entries(&self) -> Vec<(String, CacheEntry)> {
        let raw = match self.store.scan_prefix(CACHE_KEY_PREFIX).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Cache scan error: {}", e);
                return Vec::new();
            }
        };

        raw.into_iter()
            .filter_map(|(k, v)| {
                let key = k.strip_prefix(CACHE_KEY_PREFIX)?.to_string();
                decode_stored_entry(&v).map(|e| (key, e.into_entry()))
            })
            .collect()
    }

    /// Number of cached accounts.
    pub async fn count(&self) -> u64 {
        self.entries().await.len() as u64
    }

    /// Most common countries among cached entries, descending.
    pub async fn top_values(&self, limit: usize) -> Vec<ValueCount> {
        let mut counts: HashMap<String, u64> = HashMap::new();
        for (_, entry) in self.entries().await {
            if let Some(country) = entry.value.country {
                *counts.entry(country).or_insert(0) += 1;
            }
        }

        let mut top: Vec<ValueCount> = counts
            .into_iter()
            .map(|(name, count)| ValueCount { name, count })
            .collect();
        top.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.name.cmp(&b.name)));
        top.truncate(limit);
        top
    }

    /// Bytes used by cached entries. Credentials and breaker state are not counted.
    pub async fn size_bytes(&self) -> u64 {
        match self.store.size_bytes(CACHE_KEY_PREFIX).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Cache size error: {}", e);
                0
            }
        }
    }

    /// Remove every stored key except `preserve`.
    pub async fn wipe(&self, preserve: &[&str]) {
        if let Err(e) = self.store.clear_except(preserve).await {
            warn!("Cache wipe error: {}", e);
        }
    }
}
