//! Rate-limited, deduplicating work queue.
//!
//! Each reflector drains one of these with a fixed pool of workers. The queue
//! guarantees that a key is processed by at most one worker at a time:
//!
//! ```text
//!  add(k) ──► dirty? ──yes──► (coalesced)
//!               │no
//!               ▼
//!          processing? ──yes──► deferred until done(k)
//!               │no
//!               ▼
//!            [ queue ] ──get()──► processing ──done(k)──► requeue if dirty
//! ```
//!
//! Failed keys are re-added through [`WorkQueue::add_rate_limited`], which
//! waits for the key's exponential backoff and for a token from the queue's
//! global rate limiter. [`WorkQueue::forget`] clears a key's failure count
//! after a success.

use crate::resilience::{BackoffConfig, RateLimitConfig, RateLimiter};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::trace;

struct QueueState<T> {
    /// Keys ready to be handed out, in FIFO order.
    queue: VecDeque<T>,
    /// Keys that need processing (queued or deferred behind an in-flight run).
    dirty: HashSet<T>,
    /// Keys currently held by a worker.
    processing: HashSet<T>,
    /// Consecutive failures per key.
    failures: HashMap<T, u32>,
    shutting_down: bool,
}

impl<T> Default for QueueState<T> {
    fn default() -> Self {
        Self {
            queue: VecDeque::new(),
            dirty: HashSet::new(),
            processing: HashSet::new(),
            failures: HashMap::new(),
            shutting_down: false,
        }
    }
}

/// A deduplicating FIFO of keys with per-key retry backoff.
pub struct WorkQueue<T> {
    state: Mutex<QueueState<T>>,
    notify: Notify,
    backoff: BackoffConfig,
    limiter: RateLimiter,
    cancel: CancellationToken,
}

impl<T> WorkQueue<T>
where
    T: Clone + Eq + Hash + Send + Sync + std::fmt::Debug + 'static,
{
    pub fn new(backoff: BackoffConfig, rate_limit: RateLimitConfig) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            backoff,
            limiter: RateLimiter::new(rate_limit),
            cancel: CancellationToken::new(),
        }
    }

    /// Mark `item` as needing processing.
    ///
    /// A key already waiting is coalesced. A key currently being processed is
    /// deferred and handed out again once [`done`](Self::done) is called.
    pub fn add(&self, item: T) {
        let mut state = self.state.lock();
        if state.shutting_down || state.dirty.contains(&item) {
            return;
        }
        state.dirty.insert(item.clone());
        if state.processing.contains(&item) {
            trace!(?item, "Deferring key already in flight");
            return;
        }
        state.queue.push_back(item);
        drop(state);
        self.notify.notify_one();
    }

    /// Wait for the next key. Returns `None` once the queue is shut down.
    pub async fn get(&self) -> Option<T> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register interest before checking state so a concurrent add or
            // shutdown cannot slip between the check and the await.
            notified.as_mut().enable();

            {
                let mut state = self.state.lock();
                if state.shutting_down {
                    return None;
                }
                if let Some(item) = state.queue.pop_front() {
                    state.dirty.remove(&item);
                    state.processing.insert(item.clone());
                    return Some(item);
                }
            }

            notified.await;
        }
    }

    /// Release a key handed out by [`get`](Self::get).
    pub fn done(&self, item: &T) {
        let mut state = self.state.lock();
        state.processing.remove(item);
        if state.dirty.contains(item) && !state.shutting_down {
            state.queue.push_back(item.clone());
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Re-add `item` after its backoff delay and a rate-limiter token.
    pub fn add_rate_limited(self: &Arc<Self>, item: T) {
        let attempt = {
            let mut state = self.state.lock();
            let failures = state.failures.entry(item.clone()).or_insert(0);
            *failures = failures.saturating_add(1);
            *failures
        };
        let delay = self.backoff.delay_for_attempt(attempt);
        trace!(?item, attempt, delay_ms = delay.as_millis() as u64, "Scheduling retry");

        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = queue.cancel.cancelled() => return,
                _ = async {
                    tokio::time::sleep(delay).await;
                    queue.limiter.acquire().await;
                } => {}
            }
            queue.add(item);
        });
    }

    /// Clear the failure count for `item`.
    pub fn forget(&self, item: &T) {
        self.state.lock().failures.remove(item);
    }

    /// Consecutive failures recorded for `item`.
    pub fn num_requeues(&self, item: &T) -> u32 {
        self.state.lock().failures.get(item).copied().unwrap_or(0)
    }

    /// Keys waiting to be handed out.
    pub fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys currently held by workers.
    pub fn in_flight(&self) -> usize {
        self.state.lock().processing.len()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.state.lock().shutting_down
    }

    /// Stop handing out keys and wake every waiting worker.
    ///
    /// Pending delayed re-adds are dropped. Workers already holding a key
    /// finish it normally.
    pub fn shut_down(&self) {
        {
            let mut state = self.state.lock();
            if state.shutting_down {
                return;
            }
            state.shutting_down = true;
            state.queue.clear();
            state.dirty.clear();
        }
        self.cancel.cancel();
        self.notify.notify_waiters();
    }
}

impl<T> std::fmt::Debug for WorkQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("WorkQueue")
            .field("queued", &state.queue.len())
            .field("processing", &state.processing.len())
            .field("shutting_down", &state.shutting_down)
            .finish()
    }
}
