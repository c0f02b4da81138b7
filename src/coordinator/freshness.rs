//! Cache freshness policy.

use std::time::Duration;

use chrono::{DateTime, Utc};

use super::CoordinatorConfig;
use crate::models::CacheEntry;

/// How a cached entry should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Serve it, nothing else.
    Fresh,
    /// Serve it and refresh in the background if conditions allow.
    Stale,
    /// Too old to serve; fetch and wait.
    Expired,
    /// Nothing cached.
    Miss,
}

impl Freshness {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fresh => "fresh",
            Self::Stale => "stale",
            Self::Expired => "expired",
            Self::Miss => "miss",
        }
    }

}

/// Classify an entry by its age at `now`.
pub fn classify(
    entry: Option<&CacheEntry>,
    now: DateTime<Utc>,
    config: &CoordinatorConfig,
) -> Freshness {
    let Some(entry) = entry else {
        return Freshness::Miss;
    };

    let age = entry.age(now).to_std().unwrap_or_default();
    if age < config.fresh_limit {
        Freshness::Fresh
    } else if age < config.hard_limit {
        Freshness::Stale
    } else {
        Freshness::Expired
    }
}

/// Queue and breaker conditions at the moment a background refresh is considered.
#[derive(Debug, Clone, Copy)]
pub struct WorkSnapshot {
    pub queue_len: usize,
    pub executing: bool,
    /// Time since the loop last started or finished an item.
    pub idle_for: Duration,
    /// Time since the breaker last tripped; `None` if it never has.
    pub since_last_trip: Option<Duration>,
}

impl WorkSnapshot {
    /// Background work is allowed only when the loop is quiet and the last
    /// lockout is well in the past.
    pub fn is_safe_for_background(&self, config: &CoordinatorConfig) -> bool {
        let quiet =
            self.queue_len == 0 && !self.executing && self.idle_for >= config.idle_threshold;
        let recovered = self
            .since_last_trip
            .map_or(true, |since| since >= config.safety_window);
        quiet && recovered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LookupResult;

    fn entry_aged(now: DateTime<Utc>, age: chrono::Duration) -> CacheEntry {
        CacheEntry::written_at(LookupResult::with_country("Japan"), now - age)
    }

    #[test]
    fn test_classify_tiers() {
        let config = CoordinatorConfig::default();
        let now = Utc::now();

        assert_eq!(classify(None, now, &config), Freshness::Miss);

        let cases = [
            (chrono::Duration::zero(), Freshness::Fresh),
            (chrono::Duration::days(6), Freshness::Fresh),
            (chrono::Duration::days(7), Freshness::Stale),
            (chrono::Duration::days(29), Freshness::Stale),
            (chrono::Duration::days(30), Freshness::Expired),
            (chrono::Duration::days(400), Freshness::Expired),
        ];
        for (age, expected) in cases {
            let entry = entry_aged(now, age);
            assert_eq!(classify(Some(&entry), now, &config), expected, "age {}", age);
        }
    }

    #[test]
    fn test_future_timestamp_is_fresh() {
        let config = CoordinatorConfig::default();
        let now = Utc::now();
        let entry = entry_aged(now, chrono::Duration::days(-1));
        assert_eq!(classify(Some(&entry), now, &config), Freshness::Fresh);
    }

    fn quiet() -> WorkSnapshot {
        WorkSnapshot {
            queue_len: 0,
            executing: false,
            idle_for: Duration::from_secs(61),
            since_last_trip: None,
        }
    }

    #[test]
    fn test_safe_when_quiet_and_never_tripped() {
        assert!(quiet().is_safe_for_background(&CoordinatorConfig::default()));
    }

    #[test]
    fn test_unsafe_when_busy_or_recently_active() {
        let config = CoordinatorConfig::default();

        let queued = WorkSnapshot {
            queue_len: 1,
            ..quiet()
        };
        assert!(!queued.is_safe_for_background(&config));

        let executing = WorkSnapshot {
            executing: true,
            ..quiet()
        };
        assert!(!executing.is_safe_for_background(&config));

        let recent = WorkSnapshot {
            idle_for: Duration::from_secs(59),
            ..quiet()
        };
        assert!(!recent.is_safe_for_background(&config));
    }

    #[test]
    fn test_unsafe_within_safety_window_of_last_trip() {
        let config = CoordinatorConfig::default();

        let tripped = WorkSnapshot {
            since_last_trip: Some(Duration::from_secs(60 * 60)),
            ..quiet()
        };
        assert!(!tripped.is_safe_for_background(&config));

        let long_ago = WorkSnapshot {
            since_last_trip: Some(Duration::from_secs(3 * 60 * 60)),
            ..quiet()
        };
        assert!(long_ago.is_safe_for_background(&config));
    }
}
