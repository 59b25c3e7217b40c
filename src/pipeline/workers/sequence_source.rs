//! SequenceSource: replays an iterator of payloads as numbered frames.

use crate::pipeline::error::WorkerError;
use crate::pipeline::node::Worker;
use crate::pipeline::signal::{Payload, Signal};
use std::time::Duration;

type PayloadIter = Box<dyn Iterator<Item = Payload> + Send>;

/// Source worker (0 inputs, 1 output).
///
/// Each call emits the next payload with a frame index counting from zero.
/// When the iterator is exhausted the worker reports `EndOfStream`.
pub struct SequenceSource {
    items: PayloadIter,
    next_frame: u64,
    interval: Option<Duration>,
}

impl SequenceSource {
    pub fn new<I, P>(items: I) -> Self
    where
        I: IntoIterator<Item = P>,
        I::IntoIter: Send + 'static,
        P: Into<Payload> + 'static,
    {
        Self {
            items: Box::new(items.into_iter().map(Into::into)),
            next_frame: 0,
            interval: None,
        }
    }

    /// Emit `0, 1, 2, ..` as `Int64` payloads, `count` in total.
    pub fn counter(count: u64) -> Self {
        Self::new((0..count).map(|i| Payload::Int64(i as i64)))
    }

    /// Sleep `interval` before emitting each frame, to mimic a paced capture device.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval).filter(|d| !d.is_zero());
        self
    }

    /// Frames emitted so far.
    pub fn emitted(&self) -> u64 {
        self.next_frame
    }
}

impl Worker for SequenceSource {
    fn process(&mut self, _inputs: Vec<Signal>) -> Result<Vec<Signal>, WorkerError> {
        let payload = self.items.next().ok_or(WorkerError::EndOfStream)?;
        if let Some(interval) = self.interval {
            std::thread::sleep(interval);
        }
        let signal = Signal::new(payload).with_frame_index(self.next_frame);
        self.next_frame += 1;
        Ok(vec![signal])
    }
}
