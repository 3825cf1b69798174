//! Chunk envelope wire format
//!
//! Every chunk delivered by the stream is wrapped in a little-endian envelope:
//!
//! ```text
//! u32 magic (0xa12e810d)
//! str container id          (length-prefixed, 4-byte aligned)
//! u32 active mask
//! u32 event count
//! -- only when event count > 0 --
//! u32 offset value
//! str endpoint id
//! i32 rotation
//! u32 extra
//! ..  raw MP4 bytes up to the end of the buffer
//! ```

use crate::cursor::{Endian, Reader, Writer};
use crate::{Error, Result};
use bytes::Bytes;

/// Magic number opening every chunk envelope
pub const ENVELOPE_MAGIC: u32 = 0xa12e810d;

/// Per-event header carried by a chunk that holds media
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvelopeEvent {
    pub offset_value: u32,
    pub endpoint_id: String,
    /// Video rotation in degrees
    pub rotation: i32,
    pub extra: u32,
}

/// A decoded chunk envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkEnvelope {
    pub container_id: String,
    pub active_mask: u32,
    pub event_count: u32,
    /// Present when `event_count > 0`
    pub event: Option<EnvelopeEvent>,
    /// Raw MP4 bytes; empty when the chunk carries no events
    pub payload: Bytes,
}

impl ChunkEnvelope {
    /// Parse an envelope, keeping the MP4 payload as a view into `data`
    pub fn parse(data: impl Into<Bytes>) -> Result<Self> {
        let mut reader = Reader::new(data);

        let magic = reader.read_u32(Endian::Little)?;
        if magic != ENVELOPE_MAGIC {
            return Err(Error::ProtocolMismatch {
                expected: ENVELOPE_MAGIC,
                found: magic,
            });
        }

        let container_id = reader.read_length_prefixed_string()?;
        let active_mask = reader.read_u32(Endian::Little)?;
        let event_count = reader.read_u32(Endian::Little)?;

        if event_count == 0 {
            return Ok(Self {
                container_id,
                active_mask,
                event_count,
                event: None,
                payload: Bytes::new(),
            });
        }

        let offset_value = reader.read_u32(Endian::Little)?;
        let endpoint_id = reader.read_length_prefixed_string()?;
        let rotation = reader.read_i32(Endian::Little)?;
        let extra = reader.read_u32(Endian::Little)?;
        let payload = reader.read_rest();

        Ok(Self {
            container_id,
            active_mask,
            event_count,
            event: Some(EnvelopeEvent {
                offset_value,
                endpoint_id,
                rotation,
                extra,
            }),
            payload,
        })
    }

    /// Whether this chunk carries media to remux
    pub fn has_media(&self) -> bool {
        self.event_count > 0 && self.event.is_some()
    }

    /// Encode the envelope back to its wire form
    pub fn encode(&self) -> Result<Bytes> {
        let mut writer = Writer::with_capacity(32 + self.payload.len());
        writer.write_u32(ENVELOPE_MAGIC, Endian::Little)?;
        writer.write_length_prefixed_string(&self.container_id)?;
        writer.write_u32(self.active_mask, Endian::Little)?;

        match &self.event {
            Some(event) if self.event_count > 0 => {
                writer.write_u32(self.event_count, Endian::Little)?;
                writer.write_u32(event.offset_value, Endian::Little)?;
                writer.write_length_prefixed_string(&event.endpoint_id)?;
                writer.write_i32(event.rotation, Endian::Little)?;
                writer.write_u32(event.extra, Endian::Little)?;
                writer.write_bytes(&self.payload);
            }
            _ => writer.write_u32(0u32, Endian::Little)?,
        }

        Ok(writer.into_bytes())
    }

    /// Build a single-event envelope around an MP4 payload
    pub fn with_payload(container_id: impl Into<String>, endpoint_id: impl Into<String>, payload: Bytes) -> Self {
        Self {
            container_id: container_id.into(),
            active_mask: 1,
            event_count: 1,
            event: Some(EnvelopeEvent {
                offset_value: 0,
                endpoint_id: endpoint_id.into(),
                rotation: 0,
                extra: 0,
            }),
            payload,
        }
    }
}
