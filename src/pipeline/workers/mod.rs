//! Built-in generic workers.
//!
//! These stages are payload-agnostic building blocks: a source that replays
//! an iterator, a closure-driven 1→1 transform, an n→n passthrough and a
//! collecting sink. Real capture, inference and encode stages implement
//! `Worker` themselves.

pub mod collect_sink;
pub mod map;
pub mod passthrough;
pub mod sequence_source;

pub use collect_sink::{CollectBuffer, CollectSink};
pub use map::MapWorker;
pub use passthrough::Passthrough;
pub use sequence_source::SequenceSource;
