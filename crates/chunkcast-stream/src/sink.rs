//! Media sink capability

use async_trait::async_trait;
use bytes::Bytes;
use chunkcast_core::Result;

/// Buffered media sink accepting one append at a time
#[async_trait]
pub trait MediaSink: Send + 'static {
    /// Resolves once the sink is ready to accept data
    async fn opened(&mut self) -> Result<()>;

    /// Append one segment; resolves when the sink signals the append completed
    async fn append(&mut self, data: Bytes) -> Result<()>;

    /// Start or resume playback, invoked after each completed append
    async fn play(&mut self) -> Result<()> {
        Ok(())
    }
}
