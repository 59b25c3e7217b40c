//! # cvinfer-rs: Streaming Pipeline Engine
//!
//! A threaded execution engine for composing processing stages (capture,
//! inference, encode, output) into a running pipeline. Each stage is a
//! `Node` driven by its own thread and worker pool; stages exchange typed
//! `Signal`s through bounded, drop-oldest queues.
//!
//! ## Architecture
//!
//! - **Signal**: tagged payload envelope with frame index and stage timestamps
//! - **BoundedQueue**: lossy FIFO, the only structure shared between stages
//! - **WorkerPool**: fixed set of threads running submitted closures
//! - **Node**: driver thread + pool around a user-supplied `Worker`
//! - **PipelineGraph**: binds nodes with queues and starts/stops them together
//!
//! ## Configuration
//!
//! Engine settings are read from `engine.toml` in the platform config
//! directory under `cvinfer-rs` (see [`config`]).
//!
//! ## Example
//!
//! ```ignore
//! use cvinfer_rs::pipeline::{workers::*, Node, PipelineGraph};
//!
//! let sink = CollectSink::new();
//! let results = sink.buffer();
//!
//! let mut graph = PipelineGraph::new("counter");
//! graph.bind_all(vec![
//!     Node::builder("source").outputs(1).build(SequenceSource::counter(10)),
//!     Node::builder("sink").inputs(1).build(sink),
//! ])?;
//! graph.start()?;
//! // ...
//! graph.stop()?;
//! println!("{} frames", results.len());
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod pipeline;

// Re-export commonly used types
pub use config::EngineConfig;
pub use error::{CvInferError, Result, ResultExt};
pub use pipeline::{
    BoundedQueue, Node, NodeHandle, Payload, PipelineEvent, PipelineGraph, Signal, SignalKind,
    Worker, WorkerError, WorkerPool,
};
