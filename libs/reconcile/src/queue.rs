//! Deduplicating, rate-limited work queue.
//!
//! Producers call [`WorkQueue::add`] or [`WorkQueue::add_rate_limited`] from
//! any task or thread. A single consumer loops over [`WorkQueue::get`] and
//! must call [`WorkQueue::done`] for every item it received.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;
use tracing::{debug, trace};

use crate::BackoffPolicy;

/// Multi-producer, single-consumer work queue with per-item backoff.
///
/// Cloning the queue yields another handle to the same queue.
pub struct WorkQueue<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for WorkQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<T> {
    name: String,
    backoff: BackoffPolicy,
    state: Mutex<QueueState<T>>,
    notify: Notify,
}

struct QueueState<T> {
    /// Items visible to the consumer, in order.
    queue: VecDeque<T>,

    /// Items waiting to be processed (queued, or re-added while processing).
    dirty: HashSet<T>,

    /// Items currently held by the consumer.
    processing: HashSet<T>,

    /// Consecutive rate-limited requeues per item.
    failures: HashMap<T, u32>,

    shutting_down: bool,
}

impl<T> WorkQueue<T>
where
    T: Clone + Eq + Hash + Debug + Send + 'static,
{
    /// Create a new queue.
    pub fn new(name: impl Into<String>, backoff: BackoffPolicy) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                backoff,
                state: Mutex::new(QueueState {
                    queue: VecDeque::new(),
                    dirty: HashSet::new(),
                    processing: HashSet::new(),
                    failures: HashMap::new(),
                    shutting_down: false,
                }),
                notify: Notify::new(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, QueueState<T>> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue name, for logging.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Add an item.
    ///
    /// No-op if the item is already pending or the queue is shutting down. An
    /// item added while it is being processed is queued again on [`done`](Self::done).
    pub fn add(&self, item: T) {
        {
            let mut state = self.state();
            if state.shutting_down || state.dirty.contains(&item) {
                return;
            }

            state.dirty.insert(item.clone());
            if state.processing.contains(&item) {
                return;
            }

            trace!(queue = %self.inner.name, item = ?item, "queued");
            state.queue.push_back(item);
        }
        self.inner.notify.notify_one();
    }

    /// Add an item after its backoff delay.
    ///
    /// Every call counts as a failure for the item until [`forget`](Self::forget)
    /// is called, so repeated requeues back off exponentially.
    pub fn add_rate_limited(&self, item: T) {
        let delay = {
            let mut state = self.state();
            if state.shutting_down {
                return;
            }
            let attempts = state.failures.entry(item.clone()).or_insert(0);
            let delay = self.inner.backoff.delay(*attempts);
            *attempts = attempts.saturating_add(1);
            delay
        };

        if delay.is_zero() {
            self.add(item);
            return;
        }

        debug!(
            queue = %self.inner.name,
            item = ?item,
            delay_ms = delay.as_millis() as u64,
            "requeue scheduled"
        );

        let queue = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(item);
        });
    }

    /// Reset the backoff of an item.
    pub fn forget(&self, item: &T) {
        self.state().failures.remove(item);
    }

    /// Number of rate-limited requeues of an item since it was last forgotten.
    pub fn num_requeues(&self, item: &T) -> u32 {
        self.state().failures.get(item).copied().unwrap_or(0)
    }

    /// Wait for the next item.
    ///
    /// Returns `None` once the queue is shutting down and no visible item is left.
    pub async fn get(&self) -> Option<T> {
        loop {
            {
                let mut state = self.state();
                if let Some(item) = state.queue.pop_front() {
                    state.dirty.remove(&item);
                    state.processing.insert(item.clone());
                    return Some(item);
                }
                if state.shutting_down {
                    return None;
                }
            }
            self.inner.notify.notified().await;
        }
    }

    /// Mark an item as processed.
    pub fn done(&self, item: &T) {
        let requeued = {
            let mut state = self.state();
            state.processing.remove(item);
            if state.dirty.contains(item) {
                state.queue.push_back(item.clone());
                true
            } else {
                false
            }
        };
        if requeued {
            self.inner.notify.notify_one();
        }
    }

    /// Stop accepting items and wake the consumer.
    pub fn shut_down(&self) {
        self.state().shutting_down = true;
        self.inner.notify.notify_waiters();
        self.inner.notify.notify_one();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.state().shutting_down
    }

    /// Number of items visible to the consumer.
    pub fn len(&self) -> usize {
        self.state().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
