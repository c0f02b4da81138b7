//! Rate-limited fetch coordinator.
//!
//! Turns many concurrent lookups into a deduplicated, cached and paced stream
//! of at most one upstream call at a time:
//!
//! - identical in-flight lookups share one result (single-flight)
//! - cached entries are served, refreshed in the background, or refetched
//!   depending on age
//! - a FIFO queue is drained one item at a time with jittered spacing
//! - a rate-limit response opens a persisted circuit breaker that halts all
//!   upstream traffic until it expires
//! - a watchdog restarts the loop if it ever stalls with work queued
//!
//! All mutable state sits behind one mutex that is never held across an
//! `.await`.

mod breaker;
mod config;
mod error;
mod freshness;
mod queue;
mod singleflight;

pub use breaker::{lockout_duration, CircuitBreaker, Restored};
pub use config::{CoordinatorConfig, FRESH_LIMIT, HARD_LIMIT, RATE_LIMIT_FALLBACK};
pub use error::{LookupError, LookupOutcome};
pub use freshness::{classify, Freshness, WorkSnapshot};
pub use queue::{ItemKind, QueueItem, RequestQueue};
pub use singleflight::{Flight, PendingSet, SharedLookup};

use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use chrono::Utc;
use futures::future::{BoxFuture, FutureExt};
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::models::{CoordinatorStats, CoordinatorStatus, Credentials};
use crate::store::{get_i64, get_string, keys, CacheStore, KeyValueStore};
use crate::upstream::{RateLimitHint, Transport, UpstreamExecutor, UpstreamOutcome};

/// Quota text before any upstream response has reported one.
const QUOTA_UNKNOWN: &str = "Unknown";

/// Quota text while the breaker is open.
const QUOTA_LOCKED: &str = "Locked";

/// Everything guarded by the coordinator mutex.
struct CoordinatorState {
    queue: RequestQueue,
    pending: PendingSet,
    breaker: CircuitBreaker,
    credentials: Credentials,
    last_quota: String,
    session_fetch_count: u64,
    shutdown: bool,
    watchdog: Option<JoinHandle<()>>,
}

impl CoordinatorState {
    fn work_snapshot(&self) -> WorkSnapshot {
        WorkSnapshot {
            queue_len: self.queue.len(),
            executing: self.queue.current.is_some(),
            idle_for: self.queue.last_activity.elapsed(),
            since_last_trip: self.breaker.since_last_trip(Utc::now()),
        }
    }

    /// The loop should be started now.
    fn can_start(&self) -> bool {
        !self.shutdown
            && !self.queue.processing
            && !self.breaker.is_open()
            && !self.queue.is_empty()
    }
}

struct Inner {
    config: CoordinatorConfig,
    store: Arc<dyn KeyValueStore>,
    cache: CacheStore,
    executor: UpstreamExecutor,
    state: Mutex<CoordinatorState>,
}

/// Handle to the single coordinator instance. Cheap to clone.
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<Inner>,
}

impl Coordinator {
    /// Load persisted credentials and breaker state, then start the watchdog.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn init(
        config: CoordinatorConfig,
        store: Arc<dyn KeyValueStore>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let executor =
            UpstreamExecutor::new(transport, config.api_base.clone(), config.fetch_timeout);
        let credentials = load_credentials(store.as_ref()).await;

        let inner = Arc::new(Inner {
            cache: CacheStore::new(Arc::clone(&store)),
            config,
            store,
            executor,
            state: Mutex::new(CoordinatorState {
                queue: RequestQueue::new(),
                pending: PendingSet::default(),
                breaker: CircuitBreaker::default(),
                credentials,
                last_quota: QUOTA_UNKNOWN.to_string(),
                session_fetch_count: 0,
                shutdown: false,
                watchdog: None,
            }),
        });

        inner.restore_breaker().await;

        let watchdog = inner.spawn_watchdog();
        let (ready, open) = {
            let mut state = inner.lock();
            state.watchdog = Some(watchdog);
            (state.credentials.is_ready(), state.breaker.is_open())
        };
        info!("Coordinator started (ready: {}, breaker open: {})", ready, open);

        Self { inner }
    }

    /// Stop the watchdog and breaker timer and reject everything still queued.
    ///
    /// A call already in flight completes and settles its own waiters.
    pub fn shutdown(&self) {
        let (drained, watchdog) = {
            let mut state = self.inner.lock();
            if state.shutdown {
                return;
            }
            state.shutdown = true;
            state.breaker.cancel_timer();
            state.pending.clear();
            (state.queue.drain(), state.watchdog.take())
        };

        if let Some(watchdog) = watchdog {
            watchdog.abort();
        }
        let rejected = drained.len();
        for item in drained {
            item.reject(LookupError::Shutdown);
        }
        info!("Coordinator shut down ({} queued lookups rejected)", rejected);
    }

    /// Resolve `key`, from cache when possible.
    pub async fn lookup(&self, key: &str) -> LookupOutcome {
        let joined = {
            let state = self.inner.lock();
            if state.shutdown {
                return Err(LookupError::Shutdown);
            }
            state.pending.get(key)
        };
        if let Some(shared) = joined {
            debug!("Piggybacking on in-flight lookup for @{}", key);
            return shared.await;
        }

        let entry = self.inner.cache.get(key).await;
        let freshness = classify(entry.as_ref(), Utc::now(), &self.inner.config);

        match (freshness, entry) {
            (Freshness::Fresh, Some(entry)) => {
                debug!("Fresh: @{}", key);
                Ok(entry.value)
            }
            (Freshness::Stale, Some(entry)) => {
                debug!("Stale: @{}; serving cached value", key);
                self.inner.schedule_background(key);
                Ok(entry.value)
            }
            (freshness, _) => {
                debug!("{}: @{}; fetching", freshness.as_str(), key);
                self.inner.enqueue_blocking(key).await
            }
        }
    }

    /// Merge newly observed credentials (last write wins per field) and persist them.
    pub async fn credentials_updated(&self, update: Credentials) {
        let (changed, current) = {
            let mut state = self.inner.lock();
            let changed = state.credentials.merge(update);
            (changed, state.credentials.clone())
        };
        if !changed {
            return;
        }

        for (key, value) in [
            (keys::QUERY_ID, &current.query_id),
            (keys::BEARER_TOKEN, &current.bearer_token),
            (keys::CSRF_TOKEN, &current.csrf_token),
        ] {
            if let Some(value) = value {
                if let Err(e) = self.inner.store.set(key, &json!(value)).await {
                    warn!("Failed to persist {}: {}", key, e);
                }
            }
        }
        info!("Credentials updated (ready: {})", current.is_ready());
    }

    /// Query id and bearer token are both known.
    pub fn is_ready(&self) -> bool {
        self.inner.lock().credentials.is_ready()
    }

    /// Current credentials.
    pub fn credentials(&self) -> Credentials {
        self.inner.lock().credentials.clone()
    }

    /// Snapshot of queue, breaker and cache state.
    pub async fn stats(&self) -> CoordinatorStats {
        let mut stats = {
            let state = self.inner.lock();
            let open = state.breaker.is_open();
            CoordinatorStats {
                status: if open {
                    CoordinatorStatus::RateLimited
                } else {
                    CoordinatorStatus::Active
                },
                lockdown_remaining_ms: state.breaker.remaining(Utc::now()).as_millis() as u64,
                quota: if open {
                    QUOTA_LOCKED.to_string()
                } else {
                    state.last_quota.clone()
                },
                queue_length: state.queue.len(),
                max_queue_observed: state.queue.max_observed.max(state.queue.len()),
                next_key: state.queue.peek_keys(1).into_iter().next(),
                session_fetch_count: state.session_fetch_count,
                total_cached_count: 0,
                cache_size_bytes: 0,
                top_values: Vec::new(),
            }
        };

        let cache = &self.inner.cache;
        stats.total_cached_count = cache.count().await;
        stats.cache_size_bytes = cache.size_bytes().await;
        stats.top_values = cache.top_values(self.inner.config.top_values_limit).await;
        stats
    }

    /// Reject all queued work, forget in-flight keys, reset session counters
    /// and delete cached entries. Credentials and breaker state are kept.
    pub async fn wipe(&self) {
        let drained = {
            let mut state = self.inner.lock();
            state.pending.clear();
            state.session_fetch_count = 0;
            let drained = state.queue.drain();
            state.queue.max_observed = 0;
            drained
        };

        info!("Wiping cache and rejecting {} queued lookups", drained.len());
        for item in drained {
            item.reject(LookupError::Cleared);
        }
        self.inner.cache.wipe(keys::DURABLE).await;
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, CoordinatorState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start the processing loop if it is idle and allowed to run.
    fn kick(self: &Arc<Self>) {
        if self.lock().can_start() {
            tokio::spawn(Arc::clone(self).process_queue());
        }
    }

    async fn enqueue_blocking(self: &Arc<Self>, key: &str) -> LookupOutcome {
        let waiter = {
            let mut state = self.lock();
            if state.shutdown {
                return Err(LookupError::Shutdown);
            }
            match state.pending.resolve(key) {
                Flight::Joined(shared) => {
                    debug!("Piggybacking on in-flight lookup for @{}", key);
                    shared
                }
                Flight::Started {
                    generation,
                    responder,
                    waiter,
                } => {
                    state.queue.push(QueueItem {
                        key: key.to_string(),
                        kind: ItemKind::Blocking,
                        generation,
                        responder,
                    });
                    debug!("Enqueued @{} (position {})", key, state.queue.len());
                    waiter
                }
            }
        };

        self.kick();
        waiter.await
    }

    /// Queue a refresh for a stale key if nothing else is going on.
    fn schedule_background(self: &Arc<Self>, key: &str) {
        {
            let mut state = self.lock();
            if state.shutdown || state.pending.contains(key) {
                return;
            }
            if !state.work_snapshot().is_safe_for_background(&self.config) {
                debug!("Skipping background refresh for @{}: system busy", key);
                return;
            }
            if let Flight::Started {
                generation,
                responder,
                ..
            } = state.pending.resolve(key)
            {
                state.queue.push(QueueItem {
                    key: key.to_string(),
                    kind: ItemKind::Background,
                    generation,
                    responder,
                });
                debug!("Scheduled background refresh for @{}", key);
            }
        }
        self.kick();
    }

    /// One iteration of the processing loop.
    ///
    /// Boxed because each iteration schedules the next.
    fn process_queue(self: Arc<Self>) -> BoxFuture<'static, ()> {
        async move {
            let (item, credentials) = {
                let mut state = self.lock();
                if state.shutdown || state.breaker.is_open() || state.queue.processing {
                    return;
                }
                let Some(item) = state.queue.pop() else {
                    debug!("Queue empty; idle");
                    return;
                };
                state.queue.processing = true;
                state.queue.touch();
                state.queue.current = Some(item.key.clone());
                debug!(
                    "Processing @{} ({} remaining)",
                    item.key,
                    state.queue.len()
                );
                (item, state.credentials.clone())
            };

            let outcome = self.executor.execute(&credentials, &item.key).await;
            self.settle(item, outcome).await;

            let epoch = {
                let mut state = self.lock();
                state.queue.current = None;
                state.queue.touch();
                if state.shutdown {
                    state.queue.processing = false;
                    return;
                }
                state.queue.epoch
            };

            let delay = self.config.next_delay();
            debug!("Next request in {}ms", delay.as_millis());
            let inner = Arc::clone(&self);
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if !inner.lock().queue.resume(epoch) {
                    debug!("Loop was restarted during the delay; dropping continuation");
                    return;
                }
                inner.process_queue().await;
            });
        }
        .boxed()
    }

    /// Apply an outcome: cache on success, trip on rate limit, then release
    /// the key and deliver the result to its waiters.
    async fn settle(self: &Arc<Self>, item: QueueItem, outcome: UpstreamOutcome) {
        let QueueItem {
            key,
            kind,
            generation,
            responder,
        } = item;

        let result = match outcome {
            UpstreamOutcome::Success {
                result,
                quota_remaining,
            } => {
                let owned = {
                    let mut state = self.lock();
                    state.session_fetch_count += 1;
                    if let Some(quota) = quota_remaining {
                        state.last_quota = quota;
                    }
                    state.pending.is_current(&key, generation)
                };
                if owned {
                    self.cache.set(&key, &result).await;
                } else {
                    debug!("@{} was cleared while in flight; not caching", key);
                }
                Ok(result)
            }
            UpstreamOutcome::RateLimited(hint) => {
                self.trip_breaker(hint).await;
                Err(LookupError::RateLimited)
            }
            UpstreamOutcome::NotReady => Err(LookupError::NotReady),
            UpstreamOutcome::AuthRequired => Err(LookupError::LoginRequired),
            UpstreamOutcome::TransientFailure(reason) => Err(LookupError::Upstream(reason)),
        };

        match (&result, kind) {
            (Ok(value), ItemKind::Background) => {
                debug!("Background refresh for @{} -> {}", key, value.country_or_unknown())
            }
            (Ok(_), ItemKind::Blocking) => {}
            (Err(e), _) => debug!("Lookup for @{} failed: {} ({})", key, e, e.code()),
        }

        self.lock().pending.settle(&key, generation);
        if responder.send(result).is_err() && kind == ItemKind::Blocking {
            debug!("Caller for @{} went away before the result arrived", key);
        }
    }

    /// Open the breaker for a rate-limit response. No-op if already open.
    async fn trip_breaker(self: &Arc<Self>, hint: RateLimitHint) {
        let now = Utc::now();
        let duration = lockout_duration(hint.reset_at, now, &self.config);

        let locked_until = {
            let mut state = self.lock();
            state.last_quota = "0".to_string();
            match state.breaker.trip(now, duration) {
                Some(until) => until,
                None => {
                    debug!("Breaker already open; ignoring rate limit signal");
                    return;
                }
            }
        };

        warn!(
            "Rate limited; locking upstream for {}s (until {})",
            duration.as_secs(),
            locked_until.to_rfc3339()
        );

        for (key, ts) in [
            (keys::BREAKER_LOCKED_UNTIL, locked_until),
            (keys::BREAKER_LAST_TRIPPED_AT, now),
        ] {
            if let Err(e) = self.store.set(key, &json!(ts.timestamp_millis())).await {
                warn!("Failed to persist {}: {}", key, e);
            }
        }

        self.arm_breaker_timer(duration);
    }

    fn arm_breaker_timer(self: &Arc<Self>, duration: Duration) {
        let weak: Weak<Self> = Arc::downgrade(self);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            if let Some(inner) = weak.upgrade() {
                inner.close_breaker().await;
            }
        });
        self.lock().breaker.set_timer(timer.abort_handle());
    }

    async fn close_breaker(self: Arc<Self>) {
        {
            let mut state = self.lock();
            if state.shutdown {
                return;
            }
            state.breaker.close();
        }
        info!("Cooldown expired; resuming upstream traffic");

        if let Err(e) = self.store.remove(keys::BREAKER_LOCKED_UNTIL).await {
            warn!("Failed to clear persisted lockout: {}", e);
        }
        self.kick();
    }

    /// Re-arm or discard a lockout persisted by a previous run.
    async fn restore_breaker(self: &Arc<Self>) {
        let store = self.store.as_ref();
        let locked_until = get_i64(store, keys::BREAKER_LOCKED_UNTIL)
            .await
            .unwrap_or_else(|e| {
                warn!("Failed to read persisted lockout: {}", e);
                None
            });
        let last_tripped_at = get_i64(store, keys::BREAKER_LAST_TRIPPED_AT)
            .await
            .unwrap_or_else(|e| {
                warn!("Failed to read last trip time: {}", e);
                None
            });

        let restored = self
            .lock()
            .breaker
            .restore(locked_until, last_tripped_at, Utc::now());

        match restored {
            Restored::Closed => {}
            Restored::Rearm(remaining) => {
                warn!(
                    "Resuming lockout from previous run ({}s remaining)",
                    remaining.as_secs()
                );
                self.arm_breaker_timer(remaining);
            }
            Restored::Expired => {
                debug!("Persisted lockout already expired");
                if let Err(e) = self.store.remove(keys::BREAKER_LOCKED_UNTIL).await {
                    warn!("Failed to clear persisted lockout: {}", e);
                }
            }
        }
    }

    fn spawn_watchdog(self: &Arc<Self>) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        let period = self.config.watchdog_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // First tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                inner.watchdog_tick();
            }
        })
    }

    fn watchdog_tick(self: &Arc<Self>) {
        let stalled = {
            let mut state = self.lock();
            if state.shutdown {
                return;
            }
            state.queue.observe();

            let idle = state.queue.last_activity.elapsed();
            let open = state.breaker.is_open();
            if !state.queue.is_empty() || state.queue.current.is_some() || open {
                debug!(
                    "Monitor: current={} queued={} next={:?} lockdown={}s",
                    state.queue.current.as_deref().unwrap_or("-"),
                    state.queue.len(),
                    state.queue.peek_keys(3),
                    state.breaker.remaining(Utc::now()).as_secs()
                );
            }

            let stalled = !state.queue.is_empty()
                && state.queue.current.is_none()
                && !open
                && idle > self.config.stall_threshold;
            if stalled {
                warn!(
                    "Queue stalled for {}s with {} items; restarting",
                    idle.as_secs(),
                    state.queue.len()
                );
                state.queue.restart();
            }
            stalled
        };

        if stalled {
            self.kick();
        }
    }
}

async fn load_credentials(store: &dyn KeyValueStore) -> Credentials {
    let mut credentials = Credentials::default();
    for (key, slot) in [
        (keys::QUERY_ID, &mut credentials.query_id),
        (keys::BEARER_TOKEN, &mut credentials.bearer_token),
        (keys::CSRF_TOKEN, &mut credentials.csrf_token),
    ] {
        match get_string(store, key).await {
            Ok(value) => *slot = value,
            Err(e) => warn!("Failed to read {}: {}", key, e),
        }
    }
    credentials
}
