//! Integration tests for `WorkerPool`
//!
//! - Many submitting threads sharing one pool
//! - Stop waits for in-flight work
//! - Results come back through their own handles

mod common;

use cvinfer_rs::pipeline::{PoolError, WorkerPool};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[test]
fn test_concurrent_submitters() {
    let pool = Arc::new(WorkerPool::new("shared", 4));
    pool.start().unwrap();

    let submitters: Vec<_> = (0..8u64)
        .map(|t| {
            let pool = Arc::clone(&pool);
            thread::spawn(move || {
                let handles: Vec<_> = (0..100u64)
                    .map(|i| pool.submit(move || t * 1000 + i).unwrap())
                    .collect();
                handles
                    .into_iter()
                    .map(|h| h.wait().unwrap())
                    .sum::<u64>()
            })
        })
        .collect();

    let total: u64 = submitters.into_iter().map(|h| h.join().unwrap()).sum();
    let expected: u64 = (0..8u64)
        .map(|t| (0..100u64).map(|i| t * 1000 + i).sum::<u64>())
        .sum();
    assert_eq!(total, expected);
    pool.stop();
}

#[test]
fn test_stop_waits_for_in_flight_task() {
    let pool = WorkerPool::new("in-flight", 2);
    pool.start().unwrap();
    let done = Arc::new(AtomicUsize::new(0));

    let handle = {
        let done = Arc::clone(&done);
        pool.submit(move || {
            thread::sleep(Duration::from_millis(50));
            done.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap()
    };
    // Let a worker pick the task up.
    assert!(common::wait_until(common::test_timeout(), || pool.pending() == 0));

    pool.stop();
    assert_eq!(done.load(Ordering::SeqCst), 1);
    assert!(handle.wait().is_ok());
    assert!(matches!(pool.submit(|| ()), Err(PoolError::Stopped)));
}

#[test]
fn test_handle_reports_finished() {
    let pool = WorkerPool::new("finished", 1);
    pool.start().unwrap();
    let handle = pool.submit(|| "done").unwrap();
    assert!(common::wait_until(common::test_timeout(), || handle.is_finished()));
    assert_eq!(handle.wait().unwrap(), "done");
}
