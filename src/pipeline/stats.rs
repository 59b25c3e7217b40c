//! Per-node runtime counters.
//!
//! The driver thread updates a `StatsCollector` with relaxed atomics; callers
//! read a consistent-enough `NodeStats` snapshot from any thread.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Snapshot of a node's counters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeStats {
    pub name: String,
    /// Batches handed to the worker.
    pub iterations: u64,
    /// Batches whose outputs were pushed downstream.
    pub completed: u64,
    /// Signals pushed to output queues (counted once per port).
    pub emitted: u64,
    /// Batches dropped because the worker returned the wrong number of outputs.
    pub arity_drops: u64,
    /// Batches dropped because of recoverable worker errors.
    pub recoverable_errors: u64,
    /// Signals evicted from this node's output queues by overflow.
    pub overflow_drops: u64,
    pub avg_worker_time: Duration,
    pub min_worker_time: Duration,
    pub max_worker_time: Duration,
    /// Creation-to-emit latency of the most recently emitted signal.
    pub last_latency: Duration,
}

/// Atomic counters owned by a node and shared with its driver thread.
#[derive(Debug)]
pub struct StatsCollector {
    iterations: AtomicU64,
    completed: AtomicU64,
    emitted: AtomicU64,
    arity_drops: AtomicU64,
    recoverable_errors: AtomicU64,
    overflow_drops: AtomicU64,
    total_time_ns: AtomicU64,
    min_time_ns: AtomicU64,
    max_time_ns: AtomicU64,
    last_latency_ns: AtomicU64,
}

impl StatsCollector {
    pub fn new() -> Self {
        Self {
            iterations: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            emitted: AtomicU64::new(0),
            arity_drops: AtomicU64::new(0),
            recoverable_errors: AtomicU64::new(0),
            overflow_drops: AtomicU64::new(0),
            total_time_ns: AtomicU64::new(0),
            min_time_ns: AtomicU64::new(u64::MAX),
            max_time_ns: AtomicU64::new(0),
            last_latency_ns: AtomicU64::new(0),
        }
    }

    pub fn record_iteration(&self, elapsed: Duration) {
        let ns = elapsed.as_nanos().min(u64::MAX as u128) as u64;
        self.iterations.fetch_add(1, Ordering::Relaxed);
        self.total_time_ns.fetch_add(ns, Ordering::Relaxed);
        self.min_time_ns.fetch_min(ns, Ordering::Relaxed);
        self.max_time_ns.fetch_max(ns, Ordering::Relaxed);
    }

    pub fn record_completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_emitted(&self, latency: Duration) {
        self.emitted.fetch_add(1, Ordering::Relaxed);
        self.last_latency_ns.store(
            latency.as_nanos().min(u64::MAX as u128) as u64,
            Ordering::Relaxed,
        );
    }

    pub fn record_arity_drop(&self) {
        self.arity_drops.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_recoverable_error(&self) {
        self.recoverable_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_overflow(&self) {
        self.overflow_drops.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, name: &str) -> NodeStats {
        let iterations = self.iterations.load(Ordering::Relaxed);
        let total = self.total_time_ns.load(Ordering::Relaxed);
        let min = self.min_time_ns.load(Ordering::Relaxed);
        NodeStats {
            name: name.to_string(),
            iterations,
            completed: self.completed.load(Ordering::Relaxed),
            emitted: self.emitted.load(Ordering::Relaxed),
            arity_drops: self.arity_drops.load(Ordering::Relaxed),
            recoverable_errors: self.recoverable_errors.load(Ordering::Relaxed),
            overflow_drops: self.overflow_drops.load(Ordering::Relaxed),
            avg_worker_time: if iterations == 0 {
                Duration::ZERO
            } else {
                Duration::from_nanos(total / iterations)
            },
            min_worker_time: if min == u64::MAX {
                Duration::ZERO
            } else {
                Duration::from_nanos(min)
            },
            max_worker_time: Duration::from_nanos(self.max_time_ns.load(Ordering::Relaxed)),
            last_latency: Duration::from_nanos(self.last_latency_ns.load(Ordering::Relaxed)),
        }
    }
}

impl Default for StatsCollector {
    fn default() -> Self {
        Self::new()
    }
}
