//! # Work Queue
//!
//! Rate-limited, deduplicating queue of reconciliation keys.
//!
//! Guarantees:
//! - a key is handed to at most one worker at a time
//! - a key added while it is queued is not queued twice
//! - a key added while it is being processed is re-queued exactly once,
//!   when the worker calls [`WorkQueue::done`]
//! - after [`WorkQueue::shut_down`] no key is handed out any more and every
//!   blocked [`WorkQueue::get`] returns `None`
//!
//! Delayed keys (backoff) live in a min-heap ordered by their ready time.
//! Workers waiting in `get` promote them once due, so no background task is
//! needed.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::trace;

use super::backoff::KeyedBackoff;
use crate::observability::metrics;

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
struct Delayed {
    ready_at: Instant,
    seq: u64,
    key: String,
}

#[derive(Debug)]
struct QueueState {
    queue: VecDeque<String>,
    /// Keys that need processing: queued ones plus in-flight ones that were re-added
    dirty: HashSet<String>,
    processing: HashSet<String>,
    waiting: BinaryHeap<Reverse<Delayed>>,
    /// Earliest ready time per waiting key, older heap entries are stale
    waiting_since: HashMap<String, Instant>,
    seq: u64,
    backoff: KeyedBackoff,
    shutting_down: bool,
}

impl QueueState {
    /// Returns true if the key was appended to the ready queue
    fn add(&mut self, key: String) -> bool {
        if self.shutting_down || self.dirty.contains(&key) {
            return false;
        }
        self.dirty.insert(key.clone());
        if self.processing.contains(&key) {
            return false;
        }
        self.queue.push_back(key);
        metrics::set_queue_depth(self.queue.len());
        true
    }

    /// Move every delayed key that is due into the ready queue
    fn promote_ready(&mut self, now: Instant) {
        while let Some(Reverse(next)) = self.waiting.peek() {
            if next.ready_at > now {
                break;
            }
            let Some(Reverse(entry)) = self.waiting.pop() else {
                break;
            };
            if self.waiting_since.get(&entry.key) != Some(&entry.ready_at) {
                continue;
            }
            self.waiting_since.remove(&entry.key);
            self.add(entry.key);
        }
    }

    fn next_ready_at(&self) -> Option<Instant> {
        self.waiting.peek().map(|Reverse(d)| d.ready_at)
    }
}

/// Shared work queue; wrap in an `Arc` to hand it to workers
#[derive(Debug)]
pub struct WorkQueue {
    state: Mutex<QueueState>,
    ready: Notify,
}

impl WorkQueue {
    /// Queue whose rate limiter backs off from `backoff_min` up to `backoff_max`
    #[must_use]
    pub fn new(backoff_min: Duration, backoff_max: Duration) -> Self {
        Self {
            state: Mutex::new(QueueState {
                queue: VecDeque::new(),
                dirty: HashSet::new(),
                processing: HashSet::new(),
                waiting: BinaryHeap::new(),
                waiting_since: HashMap::new(),
                seq: 0,
                backoff: KeyedBackoff::new(backoff_min, backoff_max),
                shutting_down: false,
            }),
            ready: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark `key` as needing processing
    pub fn add(&self, key: impl Into<String>) {
        let key = key.into();
        trace!(key = %key, "queue add");
        if self.lock().add(key) {
            self.ready.notify_one();
        }
    }

    /// Add `key` once `delay` has elapsed
    pub fn add_after(&self, key: impl Into<String>, delay: Duration) {
        let key = key.into();
        if delay.is_zero() {
            self.add(key);
            return;
        }
        let ready_at = Instant::now() + delay;
        {
            let mut state = self.lock();
            if state.shutting_down {
                return;
            }
            if state
                .waiting_since
                .get(&key)
                .is_some_and(|existing| *existing <= ready_at)
            {
                return;
            }
            state.seq += 1;
            let seq = state.seq;
            state.waiting_since.insert(key.clone(), ready_at);
            state.waiting.push(Reverse(Delayed { ready_at, seq, key }));
        }
        // Idle workers recompute their deadline
        self.ready.notify_waiters();
    }

    /// Add `key` after the backoff its failure history calls for
    pub fn add_rate_limited(&self, key: &str) {
        let delay = self.lock().backoff.when(key);
        trace!(key, delay_ms = delay.as_millis(), "queue add rate limited");
        self.add_after(key, delay);
    }

    /// Clear the failure history of `key`
    pub fn forget(&self, key: &str) {
        self.lock().backoff.forget(key);
    }

    /// Failures recorded for `key` since it was last forgotten
    #[must_use]
    pub fn num_requeues(&self, key: &str) -> u32 {
        self.lock().backoff.num_requeues(key)
    }

    /// Wait for the next key. Returns `None` once the queue is shut down.
    ///
    /// The caller owns the key until it calls [`WorkQueue::done`].
    pub async fn get(&self) -> Option<String> {
        loop {
            let notified = self.ready.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let next_ready_at = {
                let mut state = self.lock();
                state.promote_ready(Instant::now());
                if state.shutting_down {
                    return None;
                }
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    metrics::set_queue_depth(state.queue.len());
                    if !state.queue.is_empty() {
                        self.ready.notify_one();
                    }
                    return Some(key);
                }
                state.next_ready_at()
            };

            match next_ready_at {
                Some(deadline) => {
                    tokio::select! {
                        () = &mut notified => {}
                        () = tokio::time::sleep_until(deadline) => {}
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Finish processing `key`; re-queues it if it was added meanwhile
    pub fn done(&self, key: &str) {
        let requeued = {
            let mut state = self.lock();
            state.processing.remove(key);
            if state.dirty.contains(key) && !state.shutting_down {
                state.queue.push_back(key.to_string());
                metrics::set_queue_depth(state.queue.len());
                true
            } else {
                false
            }
        };
        if requeued {
            self.ready.notify_one();
        }
    }

    /// Stop handing out keys and wake every blocked `get`
    pub fn shut_down(&self) {
        self.lock().shutting_down = true;
        self.ready.notify_waiters();
    }

    /// Keys ready to be handed out
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
