//! CollectSink: stores everything it receives for later inspection.

use crate::pipeline::error::WorkerError;
use crate::pipeline::node::Worker;
use crate::pipeline::signal::Signal;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Shared view of the signals a `CollectSink` has received.
///
/// One entry per batch; each entry holds one signal per input port.
#[derive(Debug, Clone, Default)]
pub struct CollectBuffer {
    batches: Arc<Mutex<Vec<Vec<Signal>>>>,
}

impl CollectBuffer {
    fn lock(&self) -> MutexGuard<'_, Vec<Vec<Signal>>> {
        self.batches.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Copy of every batch received so far.
    pub fn batches(&self) -> Vec<Vec<Signal>> {
        self.lock().clone()
    }

    /// Signals received on input `port`, in arrival order.
    pub fn port(&self, port: usize) -> Vec<Signal> {
        self.lock()
            .iter()
            .filter_map(|batch| batch.get(port).cloned())
            .collect()
    }

    /// Remove and return everything received so far.
    pub fn drain(&self) -> Vec<Vec<Signal>> {
        std::mem::take(&mut *self.lock())
    }
}

/// Sink worker (n inputs, 0 outputs).
#[derive(Debug, Default)]
pub struct CollectSink {
    buffer: CollectBuffer,
    limit: Option<usize>,
}

impl CollectSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep at most `limit` batches, discarding the oldest.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit.max(1));
        self
    }

    /// Handle to the collected signals, valid after the sink is moved into a node.
    pub fn buffer(&self) -> CollectBuffer {
        self.buffer.clone()
    }
}

impl Worker for CollectSink {
    fn process(&mut self, inputs: Vec<Signal>) -> Result<Vec<Signal>, WorkerError> {
        let mut batches = self.buffer.lock();
        batches.push(inputs);
        if let Some(limit) = self.limit {
            if batches.len() > limit {
                let excess = batches.len() - limit;
                batches.drain(..excess);
            }
        }
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_sees_received_batches() {
        let mut sink = CollectSink::new();
        let buffer = sink.buffer();
        sink.process(vec![Signal::from(1i64), Signal::from(2i64)]).unwrap();
        sink.process(vec![Signal::from(3i64), Signal::from(4i64)]).unwrap();

        assert_eq!(buffer.len(), 2);
        let second: Vec<_> = buffer.port(1).iter().filter_map(Signal::as_i64).collect();
        assert_eq!(second, vec![2, 4]);
        assert_eq!(buffer.drain().len(), 2);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_limit_keeps_newest() {
        let mut sink = CollectSink::new().with_limit(2);
        let buffer = sink.buffer();
        for i in 0..5i64 {
            sink.process(vec![Signal::from(i)]).unwrap();
        }
        let kept: Vec<_> = buffer.port(0).iter().filter_map(Signal::as_i64).collect();
        assert_eq!(kept, vec![3, 4]);
    }
}
