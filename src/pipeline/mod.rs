//! Threaded signal pipeline.
//!
//! Signals flow from source nodes (no inputs) through transform nodes to sink
//! nodes (no outputs). Every node runs its own driver thread and worker pool;
//! the only state shared between nodes is the `BoundedQueue` on each edge.
//!
//! # Architecture
//!
//! ```text
//! [SequenceSource] ──q──► [MapWorker] ──q──► [MapWorker] ──q──► [CollectSink]
//!                                      └──q──► [Passthrough] ...
//!
//!  Node:  driver thread ── pop one per input ──► WorkerPool ── Worker::process
//!                       ◄── await result ───────┘
//!                       ── push one per output ──► output queues
//! ```
//!
//! # Design
//!
//! - **Tagged payloads**: `Payload` is a closed sum type; `Signal::kind()` is
//!   checked before any downcast.
//! - **Lossy backpressure**: a full queue evicts its oldest signal; producers
//!   never block.
//! - **One batch in flight**: a node awaits each batch before popping the
//!   next, so outputs keep input order.
//! - **All-or-nothing binding**: every check runs before the first queue is
//!   created.

pub mod error;
pub mod graph;
pub mod id;
pub mod node;
pub mod pool;
pub mod queue;
pub mod signal;
pub mod stats;
pub mod workers;

pub use error::{
    BindError, PoolError, SignalError, StageFailure, StartError, StopError, WorkerError,
};
pub use graph::{Edge, EventCallback, GraphState, PipelineGraph};
pub use id::{EdgeId, NodeId};
pub use node::{
    EventHook, Node, NodeBuilder, NodeHandle, NodeHealth, NodeOptions, NodeState, PipelineEvent,
    Worker, DEFAULT_POLL_INTERVAL,
};
pub use pool::{TaskHandle, WorkerPool};
pub use queue::{
    BoundedQueue, QueueStats, SignalQueue, SignalQueueRef, DEFAULT_QUEUE_CAPACITY,
};
pub use signal::{BBox, Image, KeyPoint, Payload, PixelFormat, Signal, SignalKind, Stamp, Tensor};
pub use stats::{NodeStats, StatsCollector};
