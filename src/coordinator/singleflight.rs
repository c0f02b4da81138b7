//! Per-key request deduplication.
//!
//! Every key with work queued or executing maps to one shared future. All
//! callers for that key await the same future and observe the same outcome.

use std::collections::HashMap;

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::oneshot;

use super::error::{LookupError, LookupOutcome};

/// Future shared by every waiter on a key.
pub type SharedLookup = Shared<BoxFuture<'static, LookupOutcome>>;

/// Sending half held by the queued item.
pub type Responder = oneshot::Sender<LookupOutcome>;

/// Result of asking for a key's flight.
pub enum Flight {
    /// Already in flight; wait on this.
    Joined(SharedLookup),
    /// Newly registered. The caller must enqueue `responder` under `generation`.
    Started {
        generation: u64,
        responder: Responder,
        waiter: SharedLookup,
    },
}

/// Keys currently queued or executing.
#[derive(Default)]
pub struct PendingSet {
    entries: HashMap<String, (u64, SharedLookup)>,
    next_generation: u64,
}

impl PendingSet {
    /// Existing flight for `key`, if any.
    pub fn get(&self, key: &str) -> Option<SharedLookup> {
        self.entries.get(key).map(|(_, shared)| shared.clone())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Join the flight for `key`, or register a new one.
    pub fn resolve(&mut self, key: &str) -> Flight {
        if let Some(shared) = self.get(key) {
            return Flight::Joined(shared);
        }

        let (responder, rx) = oneshot::channel();
        let waiter = rx
            .map(|received| received.unwrap_or(Err(LookupError::Cleared)))
            .boxed()
            .shared();

        self.next_generation += 1;
        let generation = self.next_generation;
        self.entries
            .insert(key.to_string(), (generation, waiter.clone()));

        Flight::Started {
            generation,
            responder,
            waiter,
        }
    }

    /// Whether `generation` still owns `key`.
    pub fn is_current(&self, key: &str, generation: u64) -> bool {
        self.entries
            .get(key)
            .is_some_and(|(owner, _)| *owner == generation)
    }

    /// Remove `key` if `generation` still owns it. Returns whether it did.
    pub fn settle(&mut self, key: &str, generation: u64) -> bool {
        if self.is_current(key, generation) {
            self.entries.remove(key);
            true
        } else {
            false
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LookupResult;

    fn started(flight: Flight) -> (u64, Responder, SharedLookup) {
        match flight {
            Flight::Started {
                generation,
                responder,
                waiter,
            } => (generation, responder, waiter),
            Flight::Joined(_) => panic!("expected a new flight"),
        }
    }

    #[tokio::test]
    async fn test_second_caller_joins_and_sees_same_value() {
        let mut pending = PendingSet::default();
        let (generation, responder, first) = started(pending.resolve("alice"));

        let second = match pending.resolve("alice") {
            Flight::Joined(shared) => shared,
            Flight::Started { .. } => panic!("expected to join"),
        };

        responder
            .send(Ok(LookupResult::with_country("Japan")))
            .unwrap();
        assert!(pending.settle("alice", generation));

        assert_eq!(first.await.unwrap().country.as_deref(), Some("Japan"));
        assert_eq!(second.await.unwrap().country.as_deref(), Some("Japan"));
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn test_dropped_responder_reads_as_cleared() {
        let mut pending = PendingSet::default();
        let (_, responder, waiter) = started(pending.resolve("bob"));
        drop(responder);
        assert_eq!(waiter.await, Err(LookupError::Cleared));
    }

    #[test]
    fn test_stale_generation_does_not_remove_newer_flight() {
        let mut pending = PendingSet::default();
        let (old, _r1, _w1) = started(pending.resolve("carol"));
        pending.clear();
        let (new, _r2, _w2) = started(pending.resolve("carol"));

        assert_ne!(old, new);
        assert!(!pending.settle("carol", old));
        assert!(pending.contains("carol"));
        assert!(pending.settle("carol", new));
        assert!(!pending.contains("carol"));
    }
}
