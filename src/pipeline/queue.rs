//! Bounded FIFO with drop-oldest overflow.
//!
//! This is the only structure shared between stages. Producers never block:
//! pushing into a full queue evicts the oldest element first. Consumers can
//! either poll (`pop`) or park on a condition variable until a push arrives
//! (`pop_timeout`, `wait_non_empty`).

use crate::pipeline::signal::Signal;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Default queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100_000;

/// Queue of signals between two nodes.
pub type SignalQueue = BoundedQueue<Signal>;

/// Shared handle to a signal queue.
pub type SignalQueueRef = Arc<SignalQueue>;

/// Point-in-time counters for one queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub len: usize,
    pub capacity: usize,
    /// Total items pushed.
    pub pushed: u64,
    /// Total items popped.
    pub popped: u64,
    /// Items evicted by overflow.
    pub dropped: u64,
}

/// Thread-safe fixed-capacity FIFO.
#[derive(Debug)]
pub struct BoundedQueue<T> {
    items: Mutex<VecDeque<T>>,
    not_empty: Condvar,
    capacity: usize,
    pushed: AtomicU64,
    popped: AtomicU64,
    dropped: AtomicU64,
}

impl<T> BoundedQueue<T> {
    /// Create a queue holding at most `capacity` items (at least one).
    pub fn new(capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            not_empty: Condvar::new(),
            capacity: capacity.max(1),
            pushed: AtomicU64::new(0),
            popped: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Create a queue already wrapped for sharing.
    pub fn shared(capacity: usize) -> Arc<Self> {
        Arc::new(Self::new(capacity))
    }

    // A panic while holding the lock cannot leave the deque half-updated,
    // so a poisoned lock is still safe to use.
    fn lock(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append `item`. If the queue is full the oldest item is evicted and
    /// returned. Never blocks.
    pub fn push(&self, item: T) -> Option<T> {
        let evicted = {
            let mut items = self.lock();
            let evicted = if items.len() >= self.capacity {
                items.pop_front()
            } else {
                None
            };
            items.push_back(item);
            evicted
        };
        self.pushed.fetch_add(1, Ordering::Relaxed);
        if evicted.is_some() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        self.not_empty.notify_one();
        evicted
    }

    /// Remove the oldest item, or `None` if the queue is empty. Never blocks.
    pub fn pop(&self) -> Option<T> {
        let item = self.lock().pop_front();
        if item.is_some() {
            self.popped.fetch_add(1, Ordering::Relaxed);
        }
        item
    }

    /// Wait up to `timeout` for an item, then pop it.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut items = self.lock();
        loop {
            if let Some(item) = items.pop_front() {
                self.popped.fetch_add(1, Ordering::Relaxed);
                return Some(item);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            items = self
                .not_empty
                .wait_timeout(items, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Wait up to `timeout` until the queue holds at least one item.
    /// Returns whether it does.
    pub fn wait_non_empty(&self, timeout: Duration) -> bool {
        let items = self.lock();
        let (items, _) = self
            .not_empty
            .wait_timeout_while(items, timeout, |items| items.is_empty())
            .unwrap_or_else(PoisonError::into_inner);
        !items.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop every queued item. Returns how many were removed.
    pub fn clear(&self) -> usize {
        let mut items = self.lock();
        let n = items.len();
        items.clear();
        n
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            len: self.len(),
            capacity: self.capacity,
            pushed: self.pushed.load(Ordering::Relaxed),
            popped: self.popped.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

impl<T> Default for BoundedQueue<T> {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}
