//! FIFO of lookups waiting for their turn upstream.

use std::collections::VecDeque;

use tokio::time::Instant;

use super::error::LookupError;
use super::singleflight::Responder;

/// Why an item was enqueued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    /// A caller is waiting on the result.
    Blocking,
    /// Refresh of a stale entry; nobody waits.
    Background,
}

/// One unit of upstream work.
pub struct QueueItem {
    pub key: String,
    pub kind: ItemKind,
    pub generation: u64,
    pub responder: Responder,
}

impl QueueItem {
    /// Settle the item's waiters with an error.
    pub fn reject(self, error: LookupError) {
        let _ = self.responder.send(Err(error));
    }
}

/// Queue contents and processing-loop bookkeeping.
pub struct RequestQueue {
    items: VecDeque<QueueItem>,
    /// Set while an iteration runs or its follow-up delay is pending.
    pub processing: bool,
    /// Bumped whenever the loop is restarted from outside. A delayed
    /// continuation only resumes if the epoch it captured is still current.
    pub epoch: u64,
    /// Last time the loop started or finished an item.
    pub last_activity: Instant,
    /// Key being executed right now.
    pub current: Option<String>,
    /// Largest queue length seen this session.
    pub max_observed: usize,
}

impl RequestQueue {
    pub fn new() -> Self {
        Self {
            items: VecDeque::new(),
            processing: false,
            epoch: 0,
            last_activity: Instant::now(),
            current: None,
            max_observed: 0,
        }
    }

    pub fn push(&mut self, item: QueueItem) {
        self.items.push_back(item);
        self.observe();
    }

    pub fn pop(&mut self) -> Option<QueueItem> {
        self.items.pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Keys of the first `n` queued items.
    pub fn peek_keys(&self, n: usize) -> Vec<String> {
        self.items.iter().take(n).map(|i| i.key.clone()).collect()
    }

    /// Record the current length against the session maximum.
    pub fn observe(&mut self) {
        self.max_observed = self.max_observed.max(self.items.len());
    }

    /// Abandon whatever continuation is pending and allow a fresh start.
    pub fn restart(&mut self) {
        self.epoch += 1;
        self.processing = false;
    }

    /// Clear `processing` on behalf of the continuation scheduled under
    /// `epoch`. Returns false if a restart superseded it.
    pub fn resume(&mut self, epoch: u64) -> bool {
        if self.epoch != epoch {
            return false;
        }
        self.processing = false;
        true
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    /// Remove every queued item.
    pub fn drain(&mut self) -> Vec<QueueItem> {
        self.items.drain(..).collect()
    }
}

impl Default for RequestQueue {
    fn default() -> Self {
        Self::new()
    }
}
