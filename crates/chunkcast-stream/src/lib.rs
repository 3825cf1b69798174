//! chunkcast Stream - Polls raw chunks and feeds remuxed segments to a media sink
//!
//! The orchestrator requests chunks one at a time by increasing timestamp,
//! synthesizes the init segment from the first chunk carrying media, remuxes
//! every chunk into media segments and hands them to a single-flight append
//! queue in front of the sink.

pub mod fetch;
pub mod files;
pub mod orchestrator;
pub mod queue;
pub mod sink;

#[cfg(test)]
pub(crate) mod fixtures;

pub use fetch::{ChunkFetcher, ChunkRequest, StreamChannel};
pub use files::{DirectoryFetcher, FileSink};
pub use orchestrator::{Orchestrator, StreamState, StreamStats};
pub use queue::AppendQueue;
pub use sink::MediaSink;
