//! Durable key-value storage.
//!
//! The coordinator persists three kinds of state through this layer:
//! cached lookup results (`u_<handle>`), captured credentials, and the
//! circuit breaker lockout. Backends:
//! - SQLite (persistent, survives restarts)
//! - In-memory (ephemeral, used by tests and dry runs)

mod cache;
mod memory;
mod sqlite;

pub use cache::{CacheStore, CACHE_KEY_PREFIX};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use serde_json::Value;

/// Store keys that survive a wipe.
pub mod keys {
    pub const QUERY_ID: &str = "credentials.query_id";
    pub const BEARER_TOKEN: &str = "credentials.bearer_token";
    pub const CSRF_TOKEN: &str = "credentials.csrf_token";
    pub const BREAKER_LOCKED_UNTIL: &str = "breaker.locked_until";
    pub const BREAKER_LAST_TRIPPED_AT: &str = "breaker.last_tripped_at";

    /// Everything that must be preserved when the cache is wiped.
    pub const DURABLE: &[&str] = &[
        QUERY_ID,
        BEARER_TOKEN,
        CSRF_TOKEN,
        BREAKER_LOCKED_UNTIL,
        BREAKER_LAST_TRIPPED_AT,
    ];
}

/// Result type for store operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors from store backends.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Trait for durable key-value backends.
///
/// Values are JSON documents. Implementations must be thread-safe.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read a value.
    async fn get(&self, key: &str) -> StorageResult<Option<Value>>;

    /// Write a value, replacing any existing one.
    async fn set(&self, key: &str, value: &Value) -> StorageResult<()>;

    /// Delete a value (no-op if absent).
    async fn remove(&self, key: &str) -> StorageResult<()>;

    /// All entries whose key starts with `prefix`, ordered by key.
    async fn scan_prefix(&self, prefix: &str) -> StorageResult<Vec<(String, Value)>>;

    /// Delete everything except the listed keys.
    async fn clear_except(&self, preserve: &[&str]) -> StorageResult<()>;

    /// Approximate bytes used by keys starting with `prefix` and their values.
    async fn size_bytes(&self, prefix: &str) -> StorageResult<u64>;
}

/// Read a string value, treating errors and non-strings as absent.
pub async fn get_string(store: &dyn KeyValueStore, key: &str) -> StorageResult<Option<String>> {
    Ok(store
        .get(key)
        .await?
        .and_then(|v| v.as_str().map(str::to_string)))
}

/// Read an integer value, treating non-integers as absent.
pub async fn get_i64(store: &dyn KeyValueStore, key: &str) -> StorageResult<Option<i64>> {
    Ok(store.get(key).await?.and_then(|v| v.as_i64()))
}
