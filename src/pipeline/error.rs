//! Pipeline-specific error types.
//!
//! Errors are split by the phase in which they can happen: binding the graph,
//! starting it, stopping it, running pool tasks, and processing one batch
//! inside a stage.

use crate::pipeline::signal::SignalKind;
use std::fmt;
use thiserror::Error;

/// Errors returned by a stage's `Worker::process` (and `Worker::init`).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum WorkerError {
    /// The input carried a different payload tag than the stage handles.
    #[error("Signal tag mismatch: expected {expected:?}, found {found:?}")]
    TagMismatch {
        expected: SignalKind,
        found: SignalKind,
    },

    /// Wrong number of signals in a batch.
    #[error("Batch arity mismatch: expected {expected}, found {found}")]
    Arity { expected: usize, found: usize },

    /// The payload had the right tag but unusable content.
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// A source has nothing more to produce.
    #[error("End of stream")]
    EndOfStream,

    /// The stage can no longer run (backend gone, device lost, ...).
    #[error("Fatal stage error: {0}")]
    Fatal(String),
}

impl WorkerError {
    /// Whether this error ends the node's run-loop.
    pub fn is_fatal(&self) -> bool {
        matches!(self, WorkerError::Fatal(_))
    }

    /// Whether the current iteration is dropped and the loop keeps going.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            WorkerError::TagMismatch { .. }
                | WorkerError::Arity { .. }
                | WorkerError::InvalidPayload(_)
        )
    }
}

/// Errors building a payload that violates its own invariants.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SignalError {
    #[error("Image buffer is empty")]
    EmptyImage,

    #[error("Image buffer holds {actual} bytes, {width}x{height} {format:?} needs {expected}")]
    ImageSize {
        width: u32,
        height: u32,
        format: crate::pipeline::signal::PixelFormat,
        expected: usize,
        actual: usize,
    },

    #[error("Image dimensions {width}x{height} {format:?} overflow the address space")]
    ImageTooLarge {
        width: u32,
        height: u32,
        format: crate::pipeline::signal::PixelFormat,
    },

    #[error("Tensor shape {shape:?} needs {expected} elements, got {actual}")]
    TensorShape {
        shape: Vec<usize>,
        expected: usize,
        actual: usize,
    },
}

/// Errors from the worker pool.
#[derive(Error, Debug)]
pub enum PoolError {
    #[error("Worker pool not started")]
    NotStarted,

    #[error("Worker pool already started")]
    AlreadyStarted,

    #[error("Worker pool stopped")]
    Stopped,

    #[error("Task panicked: {0}")]
    TaskPanicked(String),

    #[error("Failed to spawn pool thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Errors wiring nodes together. Always raised before any node is started.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BindError {
    #[error(
        "Node '{upstream}' has {outputs} output(s) but node '{downstream}' has {inputs} input(s)"
    )]
    ArityMismatch {
        upstream: String,
        outputs: usize,
        downstream: String,
        inputs: usize,
    },

    #[error("Node '{node}' has no {direction} port {port} (port count {count})")]
    PortOutOfRange {
        node: String,
        direction: &'static str,
        port: usize,
        count: usize,
    },

    #[error("Input port {port} of node '{node}' is already bound")]
    PortAlreadyBound { node: String, port: usize },

    #[error("Node '{0}' appears more than once in the chain")]
    DuplicateNode(String),

    #[error("Unknown node {0:?}")]
    UnknownNode(crate::pipeline::id::NodeId),

    #[error("Edge would create a cycle")]
    CycleDetected,

    #[error("Graph is already bound")]
    AlreadyBound,

    #[error("Graph or node has already been started")]
    AlreadyStarted,
}

/// Errors starting a node or a graph.
#[derive(Error, Debug)]
pub enum StartError {
    #[error("Node '{node}' input port {port} is not bound")]
    Unbound { node: String, port: usize },

    #[error("Node '{0}' is already running")]
    AlreadyRunning(String),

    #[error("Node '{0}' was stopped and cannot be restarted")]
    Terminal(String),

    #[error("Node '{node}' worker init failed: {source}")]
    Init {
        node: String,
        #[source]
        source: WorkerError,
    },

    #[error("Node '{node}' pool error: {source}")]
    Pool {
        node: String,
        #[source]
        source: PoolError,
    },

    #[error("Failed to spawn driver thread for node '{node}': {source}")]
    Spawn {
        node: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Graph has no nodes")]
    EmptyGraph,

    #[error("Graph is not ready: {0}")]
    NotReady(String),

    #[error("Graph was stopped and cannot be restarted")]
    GraphTerminal,

    #[error("Stage '{node}' failed to start: {source}")]
    Stage {
        node: String,
        #[source]
        source: Box<StartError>,
    },
}

/// One stage that ended abnormally.
#[derive(Debug, Clone, PartialEq)]
pub struct StageFailure {
    pub node: String,
    pub reason: String,
}

impl fmt::Display for StageFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.node, self.reason)
    }
}

/// Errors stopping a node or a graph.
///
/// The stop itself always completes; the error reports what went wrong while
/// the stage was running.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StopError {
    #[error("Stage '{node}' failed: {reason}")]
    StageFailed { node: String, reason: String },

    #[error("Driver thread of node '{0}' panicked")]
    DriverPanicked(String),

    #[error("{} stage(s) failed: {}", .0.len(), join_failures(.0))]
    StageFailures(Vec<StageFailure>),
}

fn join_failures(failures: &[StageFailure]) -> String {
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
