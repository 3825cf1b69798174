//! Chunk fetch capability

use async_trait::async_trait;
use bytes::Bytes;
use chunkcast_core::{Result, StreamConfig};
use serde::{Deserialize, Serialize};

/// A channel of a group call stream, as reported by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamChannel {
    pub channel: i32,
    /// Time scale the server addresses chunks with
    pub scale: i32,
    /// Timestamp of the newest available chunk, in milliseconds
    pub last_timestamp_ms: i64,
}

/// Parameters of one chunk download
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkRequest {
    /// Call the stream belongs to
    pub call: String,
    pub scale: i32,
    pub timestamp_ms: i64,
    pub video_channel: i32,
    pub video_quality: i32,
    pub offset: u64,
    pub limit: u32,
}

impl ChunkRequest {
    /// Request for the chunk at `timestamp_ms` on `channel`
    pub fn new(call: &str, channel: &StreamChannel, timestamp_ms: i64, config: &StreamConfig) -> Self {
        Self {
            call: call.to_string(),
            scale: channel.scale,
            timestamp_ms,
            video_channel: config.video_channel,
            video_quality: config.video_quality,
            offset: 0,
            limit: config.fetch_limit,
        }
    }
}

/// Source of raw stream chunks.
///
/// `fetch` reports a chunk that is not available yet as
/// [`Error::TimeTooBig`](chunkcast_core::Error::TimeTooBig); any other error
/// ends the session.
#[async_trait]
pub trait ChunkFetcher: Send + Sync {
    /// Channels of the stream for `call`
    async fn stream_channels(&self, call: &str) -> Result<Vec<StreamChannel>>;

    /// Download one chunk
    async fn fetch(&self, request: &ChunkRequest) -> Result<Bytes>;
}
