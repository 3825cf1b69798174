//! chunkcast Core - Shared types and wire codecs
//!
//! This crate provides the foundational types used across all chunkcast components:
//! the error taxonomy, stream configuration, the endian-aware byte cursor,
//! the chunk envelope codec and the per-session segment counters.

pub mod config;
pub mod cursor;
pub mod envelope;
pub mod error;
pub mod segment;
pub mod session;

pub use config::{RemuxStrategy, StreamConfig};
pub use cursor::{Endian, Reader, Writer};
pub use envelope::{ChunkEnvelope, EnvelopeEvent, ENVELOPE_MAGIC};
pub use error::{Error, Result};
pub use segment::{Segment, SegmentKind};
pub use session::SessionState;
