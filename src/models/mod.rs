//! Data models for whereabouts.

mod credentials;
mod lookup;
mod stats;

pub use credentials::{mask_secret, Credentials};
pub use lookup::{
    decode_stored_entry, parse_count, CacheEntry, LookupResult, StoredEntry,
    CACHE_SCHEMA_VERSION,
};
pub use stats::{CoordinatorStats, CoordinatorStatus, ValueCount};
