//! Passthrough: forwards every input to the output with the same index.

use crate::pipeline::error::WorkerError;
use crate::pipeline::node::Worker;
use crate::pipeline::signal::Signal;

/// n→n identity stage. Useful as a tap point or to split a queue.
#[derive(Debug, Default, Clone, Copy)]
pub struct Passthrough;

impl Worker for Passthrough {
    fn process(&mut self, inputs: Vec<Signal>) -> Result<Vec<Signal>, WorkerError> {
        Ok(inputs)
    }
}
