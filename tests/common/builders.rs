//! Test workers and node builders

use cvinfer_rs::pipeline::{
    Node, NodeHandle, Payload, Signal, SignalKind, Worker, WorkerError,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Adds `step` to an `Int64` payload; any other tag is a recoverable mismatch.
pub struct Increment {
    pub step: i64,
}

impl Worker for Increment {
    fn process(&mut self, inputs: Vec<Signal>) -> Result<Vec<Signal>, WorkerError> {
        let input = &inputs[0];
        let value = input.as_i64().ok_or(WorkerError::TagMismatch {
            expected: SignalKind::Int64,
            found: input.kind(),
        })?;
        Ok(vec![input.derive(Payload::Int64(value + self.step))])
    }
}

/// Sleeps for a fixed time per batch, then forwards it.
pub struct SlowWorker {
    pub delay: Duration,
    pub entered: Arc<AtomicBool>,
    pub finished: Arc<AtomicBool>,
}

impl SlowWorker {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            entered: Arc::new(AtomicBool::new(false)),
            finished: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl Worker for SlowWorker {
    fn process(&mut self, inputs: Vec<Signal>) -> Result<Vec<Signal>, WorkerError> {
        self.entered.store(true, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        self.finished.store(true, Ordering::SeqCst);
        Ok(inputs)
    }
}

/// 1→1 increment node.
pub fn increment_node(name: &str) -> NodeHandle {
    Node::builder(name)
        .inputs(1)
        .outputs(1)
        .build(Increment { step: 1 })
}

/// `count` increment nodes named `inc-0`, `inc-1`, ...
pub fn increment_chain(count: usize) -> Vec<NodeHandle> {
    (0..count)
        .map(|i| increment_node(&format!("inc-{}", i)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_increment_chain_builder() {
        let chain = increment_chain(3);
        assert_eq!(chain.len(), 3);
        assert_eq!(chain[2].name(), "inc-2");
        assert_eq!(chain[0].input_count(), 1);
    }
}
