//! Reconciliation loop primitives.
//!
//! This library provides the plumbing for a serialized reconciliation loop:
//!
//! - **Work queue**: a multi-producer, single-consumer queue of jobs that
//!   deduplicates pending items by value.
//! - **Rate-limited requeue**: failed or unfinished jobs come back after a
//!   per-item exponential backoff, which is reset once the job succeeds.
//! - **Requeue decision**: what a job asks the loop to do after it ran.
//!
//! # Invariants
//!
//! - An item is pending at most once at any time
//! - An item handed out by [`WorkQueue::get`] is not handed out again until
//!   [`WorkQueue::done`] is called for it
//! - After [`WorkQueue::shut_down`], no new items are accepted and `get`
//!   returns `None` once the visible items are drained

mod backoff;
mod queue;

use std::time::Duration;

pub use backoff::BackoffPolicy;
pub use queue::WorkQueue;

/// What the worker loop does with a job after it ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequeueMode {
    /// Forget the job.
    Drop,

    /// Re-add the job at the tail of the queue after a backoff delay.
    RequeueTail,
}

impl RequeueMode {
    /// Returns true if the job should be queued again.
    pub fn is_requeue(&self) -> bool {
        matches!(self, Self::RequeueTail)
    }
}

/// Default base delay for the first requeue of a job.
pub const DEFAULT_REQUEUE_BASE: Duration = Duration::from_millis(5);

/// Default upper bound for the requeue delay.
pub const DEFAULT_REQUEUE_MAX: Duration = Duration::from_secs(1000);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requeue_mode() {
        assert!(RequeueMode::RequeueTail.is_requeue());
        assert!(!RequeueMode::Drop.is_requeue());
    }
}
