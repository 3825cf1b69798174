//! Per-session sequencing state
//!
//! Owned by the streaming orchestrator for the lifetime of one playback
//! session and never persisted.

use crate::{Error, Result};

/// Segment sequencing state for one playback session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    init_segment_sent: bool,
    next_segment_id: u32,
    decode_time_offset: u64,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn init_segment_sent(&self) -> bool {
        self.init_segment_sent
    }

    /// Record that the init segment went out.
    ///
    /// Returns `false` if it had already been sent.
    pub fn mark_init_segment_sent(&mut self) -> bool {
        !std::mem::replace(&mut self.init_segment_sent, true)
    }

    /// Sequence number the next media segment will carry
    pub fn next_segment_id(&self) -> u32 {
        self.next_segment_id
    }

    /// Resume sequencing at `id`
    pub fn with_next_segment_id(mut self, id: u32) -> Self {
        self.next_segment_id = id;
        self
    }

    /// Hand out the next sequence number; each value is returned once.
    ///
    /// Fails with `Overflow` instead of wrapping once the 32-bit sequence
    /// space is used up.
    pub fn take_segment_id(&mut self) -> Result<u32> {
        let id = self.next_segment_id;
        self.next_segment_id = id
            .checked_add(1)
            .ok_or(Error::Overflow(id as i128 + 1))?;
        Ok(id)
    }

    /// Base decode time for the next media segment
    pub fn decode_time_offset(&self) -> u64 {
        self.decode_time_offset
    }

    /// Move the decode time forward by one chunk.
    ///
    /// The quantum is a fixed server cadence, not the decoded duration of the
    /// chunk, so long sessions can drift from the true media timeline.
    pub fn advance_decode_time(&mut self, quantum: u64) {
        self.decode_time_offset = self.decode_time_offset.saturating_add(quantum);
    }
}
