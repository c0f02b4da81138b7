//! Global circuit breaker gating all upstream traffic.
//!
//! The breaker is OPEN while `locked_until` is set. Only the expiry timer
//! owned by the coordinator closes it; nothing here compares against the
//! clock to decide openness.

use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use tokio::task::AbortHandle;

use super::CoordinatorConfig;

/// What to do with breaker state read back from the store at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Restored {
    /// Nothing persisted.
    Closed,
    /// Lockout still running; arm a timer for the remainder.
    Rearm(Duration),
    /// Lockout ended while we were down; forget it.
    Expired,
}

/// Breaker state plus the handle of its pending expiry timer.
#[derive(Debug, Default)]
pub struct CircuitBreaker {
    locked_until: Option<DateTime<Utc>>,
    last_tripped_at: Option<DateTime<Utc>>,
    timer: Option<AbortHandle>,
}

impl CircuitBreaker {
    pub fn is_open(&self) -> bool {
        self.locked_until.is_some()
    }

    pub fn locked_until(&self) -> Option<DateTime<Utc>> {
        self.locked_until
    }

    pub fn last_tripped_at(&self) -> Option<DateTime<Utc>> {
        self.last_tripped_at
    }

    /// Time left on the current lockout (zero when closed).
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        self.locked_until
            .and_then(|until| (until - now).to_std().ok())
            .unwrap_or_default()
    }

    /// Time since the last trip, if there was one.
    pub fn since_last_trip(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.last_tripped_at
            .map(|at| (now - at).to_std().unwrap_or_default())
    }

    /// Open the breaker for `duration`.
    ///
    /// Returns the new `locked_until`, or `None` if it was already open (in
    /// which case nothing changes).
    pub fn trip(&mut self, now: DateTime<Utc>, duration: Duration) -> Option<DateTime<Utc>> {
        if self.is_open() {
            return None;
        }
        let until = chrono::Duration::from_std(duration)
            .ok()
            .and_then(|d| now.checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.locked_until = Some(until);
        self.last_tripped_at = Some(now);
        Some(until)
    }

    /// Close the breaker. The timer handle is dropped, not aborted, since the
    /// timer itself is usually the caller.
    pub fn close(&mut self) {
        self.locked_until = None;
        self.timer = None;
    }

    pub fn set_timer(&mut self, handle: AbortHandle) {
        if let Some(old) = self.timer.replace(handle) {
            old.abort();
        }
    }

    /// Abort the expiry timer without changing state.
    pub fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }

    /// Load persisted state (unix milliseconds) and decide how to resume.
    pub fn restore(
        &mut self,
        locked_until_ms: Option<i64>,
        last_tripped_at_ms: Option<i64>,
        now: DateTime<Utc>,
    ) -> Restored {
        self.last_tripped_at = last_tripped_at_ms.and_then(from_millis);

        match locked_until_ms.and_then(from_millis) {
            None => Restored::Closed,
            Some(until) if until > now => {
                self.locked_until = Some(until);
                Restored::Rearm(self.remaining(now))
            }
            Some(_) => Restored::Expired,
        }
    }
}

/// Lockout length for a rate-limit response.
///
/// Uses the upstream reset time plus a margin when it lies in the future,
/// otherwise the configured fallback.
pub fn lockout_duration(
    reset_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    config: &CoordinatorConfig,
) -> Duration {
    match reset_at.and_then(|at| (at - now).to_std().ok()) {
        Some(wait) if !wait.is_zero() => wait + config.reset_margin,
        _ => config.rate_limit_fallback,
    }
}

fn from_millis(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lockout_duration_uses_future_reset_plus_margin() {
        let config = CoordinatorConfig::default();
        let now = Utc::now();
        let reset = now + chrono::Duration::seconds(60);
        assert_eq!(
            lockout_duration(Some(reset), now, &config),
            Duration::from_secs(62)
        );
    }

    #[test]
    fn test_lockout_duration_falls_back() {
        let config = CoordinatorConfig::default();
        let now = Utc::now();
        assert_eq!(
            lockout_duration(None, now, &config),
            Duration::from_millis(700_000)
        );
        let past = now - chrono::Duration::seconds(5);
        assert_eq!(
            lockout_duration(Some(past), now, &config),
            Duration::from_millis(700_000)
        );
    }

    #[test]
    fn test_trip_while_open_is_noop() {
        let mut breaker = CircuitBreaker::default();
        let now = Utc::now();

        let first = breaker.trip(now, Duration::from_secs(60));
        assert!(first.is_some());
        assert!(breaker.is_open());

        let later = now + chrono::Duration::seconds(10);
        assert_eq!(breaker.trip(later, Duration::from_secs(600)), None);
        assert_eq!(breaker.locked_until(), first);
        assert_eq!(breaker.last_tripped_at(), Some(now));
    }

    #[test]
    fn test_close_keeps_last_trip() {
        let mut breaker = CircuitBreaker::default();
        let now = Utc::now();
        breaker.trip(now, Duration::from_secs(1));
        breaker.close();

        assert!(!breaker.is_open());
        assert_eq!(breaker.remaining(now), Duration::ZERO);
        assert_eq!(breaker.since_last_trip(now), Some(Duration::ZERO));
    }

    #[test]
    fn test_restore() {
        let ms = 1_700_000_000_000i64;
        let now = Utc.timestamp_millis_opt(ms).unwrap();

        let mut breaker = CircuitBreaker::default();
        assert_eq!(breaker.restore(None, None, now), Restored::Closed);
        assert!(!breaker.is_open());

        let mut breaker = CircuitBreaker::default();
        match breaker.restore(Some(ms + 30_000), Some(ms - 1_000), now) {
            Restored::Rearm(left) => assert_eq!(left, Duration::from_secs(30)),
            other => panic!("expected rearm, got {:?}", other),
        }
        assert!(breaker.is_open());
        assert!(breaker.last_tripped_at().is_some());

        let mut breaker = CircuitBreaker::default();
        assert_eq!(
            breaker.restore(Some(ms - 30_000), Some(ms - 60_000), now),
            Restored::Expired
        );
        assert!(!breaker.is_open());
        assert_eq!(
            breaker.since_last_trip(now),
            Some(Duration::from_secs(60))
        );
    }
}
