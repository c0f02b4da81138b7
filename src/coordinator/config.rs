//! Coordinator timing and policy configuration.

use std::time::Duration;

use crate::upstream::DEFAULT_API_BASE;

/// Age below which a cached entry is served without any upstream activity.
pub const FRESH_LIMIT: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Age at or above which a cached entry is no longer served.
pub const HARD_LIMIT: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Lockout used when a rate-limit response carries no usable reset time.
pub const RATE_LIMIT_FALLBACK: Duration = Duration::from_millis(700_000);

/// Tunables for the queue, breaker, freshness policy and watchdog.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Base spacing between consecutive upstream calls.
    pub request_delay: Duration,
    /// Maximum random deviation applied to `request_delay` in either direction.
    pub jitter: Duration,
    /// Lockout when the upstream reset hint is missing or already past.
    pub rate_limit_fallback: Duration,
    /// Added to the upstream reset hint.
    pub reset_margin: Duration,
    /// Hard bound on a single upstream call.
    pub fetch_timeout: Duration,
    /// How often the watchdog inspects the loop.
    pub watchdog_interval: Duration,
    /// Inactivity with queued work after which the loop is considered stalled.
    pub stall_threshold: Duration,
    pub fresh_limit: Duration,
    pub hard_limit: Duration,
    /// Quiet time required before a background refresh may be scheduled.
    pub idle_threshold: Duration,
    /// Minimum time since the last breaker trip before background refreshes resume.
    pub safety_window: Duration,
    /// Number of entries reported in `CoordinatorStats::top_values`.
    pub top_values_limit: usize,
    /// Base URL of the upstream GraphQL API.
    pub api_base: String,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            request_delay: Duration::from_millis(500),
            jitter: Duration::from_millis(100),
            rate_limit_fallback: RATE_LIMIT_FALLBACK,
            reset_margin: Duration::from_secs(2),
            fetch_timeout: Duration::from_secs(10),
            watchdog_interval: Duration::from_secs(1),
            stall_threshold: Duration::from_secs(5),
            fresh_limit: FRESH_LIMIT,
            hard_limit: HARD_LIMIT,
            idle_threshold: Duration::from_secs(60),
            safety_window: Duration::from_secs(2 * 60 * 60),
            top_values_limit: 5,
            api_base: DEFAULT_API_BASE.to_string(),
        }
    }
}

impl CoordinatorConfig {
    /// Delay before the next queue iteration: `request_delay ± jitter`.
    pub fn next_delay(&self) -> Duration {
        use rand::Rng;

        let jitter_ms = self.jitter.as_millis() as i64;
        let offset = if jitter_ms > 0 {
            rand::rng().random_range(-jitter_ms..=jitter_ms)
        } else {
            0
        };
        let delay_ms = (self.request_delay.as_millis() as i64 + offset).max(0);
        Duration::from_millis(delay_ms as u64)
    }
}
