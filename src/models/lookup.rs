//! Lookup results and their cached form.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Current on-disk schema version for cache entries.
pub const CACHE_SCHEMA_VERSION: u32 = 2;

/// What the upstream told us about an account.
///
/// An absent `country` is a valid answer meaning "unknown".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location_accurate: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_change_count: Option<i64>,
}

impl LookupResult {
    /// Result carrying only a country.
    pub fn with_country(country: impl Into<String>) -> Self {
        Self {
            country: Some(country.into()),
            ..Default::default()
        }
    }

    /// Country name for display, or "Unknown".
    pub fn country_or_unknown(&self) -> &str {
        self.country.as_deref().unwrap_or("Unknown")
    }
}

/// A cached lookup result together with the time it was written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub version: u32,
    pub value: LookupResult,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub written_at: DateTime<Utc>,
}

impl CacheEntry {
    /// Create an entry written now.
    pub fn new(value: LookupResult) -> Self {
        Self::written_at(value, Utc::now())
    }

    /// Create an entry with an explicit write time.
    pub fn written_at(value: LookupResult, written_at: DateTime<Utc>) -> Self {
        Self {
            version: CACHE_SCHEMA_VERSION,
            value,
            written_at,
        }
    }

    /// Age of this entry relative to `now` (never negative).
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        (now - self.written_at).max(chrono::Duration::zero())
    }
}

/// Outcome of decoding a stored cache document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoredEntry {
    /// Already in the current schema.
    Current(CacheEntry),
    /// Written by an older release; should be rewritten in the current schema.
    Legacy(CacheEntry),
}

impl StoredEntry {
    pub fn into_entry(self) -> CacheEntry {
        match self {
            Self::Current(entry) | Self::Legacy(entry) => entry,
        }
    }

    pub fn is_legacy(&self) -> bool {
        matches!(self, Self::Legacy(_))
    }
}

/// Decode a stored cache document, accepting the legacy shapes.
///
/// Legacy documents carry a `timestamp` (unix ms) and either a `value` that is
/// a bare country string or an object with `country` / `about_profile`, or a
/// top-level `country` field.
pub fn decode_stored_entry(raw: &Value) -> Option<StoredEntry> {
    let obj = raw.as_object()?;

    if obj.get("version").and_then(Value::as_u64) == Some(CACHE_SCHEMA_VERSION as u64) {
        return serde_json::from_value::<CacheEntry>(raw.clone())
            .ok()
            .map(StoredEntry::Current);
    }

    let written_at = obj
        .get("timestamp")
        .and_then(Value::as_i64)
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())?;

    let value = match obj.get("value") {
        Some(Value::String(country)) => LookupResult::with_country(country.clone()),
        Some(Value::Object(inner)) => legacy_object_result(inner),
        Some(Value::Null) | None => match obj.get("country") {
            Some(Value::String(country)) => LookupResult::with_country(country.clone()),
            Some(Value::Null) => LookupResult::default(),
            _ => return None,
        },
        Some(_) => return None,
    };

    Some(StoredEntry::Legacy(CacheEntry::written_at(value, written_at)))
}

fn legacy_object_result(inner: &serde_json::Map<String, Value>) -> LookupResult {
    let about = inner.get("about_profile").and_then(Value::as_object);

    let country = inner
        .get("country")
        .and_then(Value::as_str)
        .or_else(|| about.and_then(|a| a.get("account_based_in")).and_then(Value::as_str))
        .map(str::to_string);

    let location_accurate = about
        .and_then(|a| a.get("location_accurate"))
        .and_then(Value::as_bool);

    let username_change_count = about
        .and_then(|a| a.get("username_changes"))
        .and_then(|c| c.get("count"))
        .and_then(parse_count);

    LookupResult {
        country,
        location_accurate,
        username_change_count,
    }
}

/// Counts arrive either as JSON integers or as decimal strings.
pub fn parse_count(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
