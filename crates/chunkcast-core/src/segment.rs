//! Finished segments handed to the media sink

use bytes::Bytes;

/// What a segment initializes or carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    /// `ftyp` + fragmented `moov`, emitted once per session
    Init,
    /// `moof` + `mdat` pair
    Media {
        /// Fragment sequence number written into `mfhd`
        sequence: u32,
        /// Base media decode time written into `tfdt`
        decode_time: u64,
    },
}

/// A serialized segment ready to be appended to the sink
#[derive(Clone)]
pub struct Segment {
    /// The segment bytes
    pub data: Bytes,
    /// Segment kind and its sequencing fields
    pub kind: SegmentKind,
}

impl Segment {
    /// Create the initialization segment
    pub fn init(data: Bytes) -> Self {
        Self {
            data,
            kind: SegmentKind::Init,
        }
    }

    /// Create a media segment
    pub fn media(data: Bytes, sequence: u32, decode_time: u64) -> Self {
        Self {
            data,
            kind: SegmentKind::Media {
                sequence,
                decode_time,
            },
        }
    }

    pub fn is_init(&self) -> bool {
        matches!(self.kind, SegmentKind::Init)
    }

    /// Fragment sequence number, if this is a media segment
    pub fn sequence(&self) -> Option<u32> {
        match self.kind {
            SegmentKind::Media { sequence, .. } => Some(sequence),
            SegmentKind::Init => None,
        }
    }

    /// Get total size in bytes
    pub fn size(&self) -> usize {
        self.data.len()
    }
}

impl std::fmt::Debug for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Segment")
            .field("kind", &self.kind)
            .field("size", &self.data.len())
            .finish()
    }
}
