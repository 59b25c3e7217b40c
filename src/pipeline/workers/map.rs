//! MapWorker: 1→1 transform driven by a closure.

use crate::pipeline::error::WorkerError;
use crate::pipeline::node::Worker;
use crate::pipeline::signal::Signal;

/// Applies `f` to every incoming signal.
///
/// Errors from `f` are passed through unchanged, so the closure decides
/// whether a bad item is dropped (recoverable) or stops the node (`Fatal`).
pub struct MapWorker<F> {
    f: F,
}

impl<F> MapWorker<F>
where
    F: FnMut(Signal) -> Result<Signal, WorkerError> + Send + 'static,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> Worker for MapWorker<F>
where
    F: FnMut(Signal) -> Result<Signal, WorkerError> + Send + 'static,
{
    fn process(&mut self, inputs: Vec<Signal>) -> Result<Vec<Signal>, WorkerError> {
        let found = inputs.len();
        let mut inputs = inputs.into_iter();
        match (inputs.next(), inputs.next()) {
            (Some(signal), None) => Ok(vec![(self.f)(signal)?]),
            _ => Err(WorkerError::Arity { expected: 1, found }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::signal::{Payload, SignalKind};

    fn increment() -> MapWorker<impl FnMut(Signal) -> Result<Signal, WorkerError> + Send + 'static> {
        MapWorker::new(|signal: Signal| {
            let value = signal.as_i64().ok_or(WorkerError::TagMismatch {
                expected: SignalKind::Int64,
                found: signal.kind(),
            })?;
            Ok(signal.derive(Payload::Int64(value + 1)))
        })
    }

    #[test]
    fn test_applies_closure() {
        let mut worker = increment();
        let out = worker.process(vec![Signal::from(41i64)]).unwrap();
        assert_eq!(out[0].as_i64(), Some(42));
    }

    #[test]
    fn test_tag_mismatch_is_recoverable() {
        let mut worker = increment();
        let err = worker.process(vec![Signal::from("nope")]).unwrap_err();
        assert!(err.is_recoverable());
        assert_eq!(
            err,
            WorkerError::TagMismatch {
                expected: SignalKind::Int64,
                found: SignalKind::String
            }
        );
    }

    #[test]
    fn test_wrong_batch_size() {
        let mut worker = increment();
        assert_eq!(
            worker.process(Vec::new()),
            Err(WorkerError::Arity { expected: 1, found: 0 })
        );
    }
}
