//! Read-only coordinator snapshot for status displays.

use serde::{Deserialize, Serialize};

/// Overall coordinator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordinatorStatus {
    Active,
    RateLimited,
}

impl CoordinatorStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::RateLimited => "rate_limited",
        }
    }
}

/// How many cached accounts resolved to a given value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueCount {
    pub name: String,
    pub count: u64,
}

/// Snapshot returned by `Coordinator::stats`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoordinatorStats {
    pub status: CoordinatorStatus,
    pub lockdown_remaining_ms: u64,
    /// Last remaining-quota hint seen from upstream ("Unknown" until one arrives).
    pub quota: String,
    pub queue_length: usize,
    pub max_queue_observed: usize,
    pub next_key: Option<String>,
    pub session_fetch_count: u64,
    pub total_cached_count: u64,
    pub cache_size_bytes: u64,
    pub top_values: Vec<ValueCount>,
}
