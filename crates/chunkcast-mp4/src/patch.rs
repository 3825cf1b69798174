//! Clone-then-patch helpers for header fields
//!
//! Patches never touch the parsed source buffer: the payload is copied into a
//! fresh allocation, the field is overwritten there and a new box is returned.

use crate::boxes::{fourcc_str, Mp4Box};
use bytes::{Bytes, BytesMut};
use chunkcast_core::{Error, Result};

/// Location and width of a numeric header field inside a box payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    U32(usize),
    U64(usize),
}

impl Field {
    fn end(&self) -> usize {
        match *self {
            Field::U32(offset) => offset + 4,
            Field::U64(offset) => offset + 8,
        }
    }
}

fn check_bounds(payload: &[u8], field: Field) -> Result<()> {
    if field.end() > payload.len() {
        let start = match field {
            Field::U32(offset) | Field::U64(offset) => offset,
        };
        return Err(Error::OutOfBounds {
            needed: field.end() - start,
            remaining: payload.len().saturating_sub(start),
        });
    }
    Ok(())
}

/// Read a big-endian field from a payload
pub fn read_field(payload: &[u8], field: Field) -> Result<u64> {
    check_bounds(payload, field)?;
    Ok(match field {
        Field::U32(o) => u32::from_be_bytes([payload[o], payload[o + 1], payload[o + 2], payload[o + 3]]) as u64,
        Field::U64(o) => {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&payload[o..o + 8]);
            u64::from_be_bytes(raw)
        }
    })
}

/// Copy `payload` and overwrite one big-endian field in the copy
pub fn patched(payload: &Bytes, field: Field, value: u64) -> Result<Bytes> {
    check_bounds(payload, field)?;
    let mut copy = BytesMut::from(&payload[..]);
    match field {
        Field::U32(o) => {
            let value = u32::try_from(value).map_err(|_| Error::Overflow(value as i128))?;
            copy[o..o + 4].copy_from_slice(&value.to_be_bytes());
        }
        Field::U64(o) => copy[o..o + 8].copy_from_slice(&value.to_be_bytes()),
    }
    Ok(copy.freeze())
}

impl Mp4Box {
    /// Read a header field of this leaf box
    pub fn field(&self, field: Field) -> Result<u64> {
        read_field(self.payload()?, field)
    }

    /// Clone this leaf box with one field overwritten
    pub fn with_field(&self, field: Field, value: u64) -> Result<Mp4Box> {
        Ok(Mp4Box::bytes(self.box_type, patched(self.payload()?, field, value)?))
    }
}

/// Duration field of an `mvhd`, `mdhd` or `tkhd` payload
pub fn duration_field(header: &Mp4Box) -> Result<Field> {
    let v1 = header.version()? == 1;
    match &header.box_type {
        // version/flags, creation, modification, timescale, duration
        b"mvhd" | b"mdhd" => Ok(if v1 { Field::U64(24) } else { Field::U32(16) }),
        // version/flags, creation, modification, track_ID, reserved, duration
        b"tkhd" => Ok(if v1 { Field::U64(28) } else { Field::U32(20) }),
        other => Err(Error::unexpected_value(other, "a duration field")),
    }
}

/// Track id field of a `tkhd` payload
pub fn track_id_field(tkhd: &Mp4Box) -> Result<Field> {
    if &tkhd.box_type != b"tkhd" {
        return Err(Error::unexpected_value(&tkhd.box_type, "a track id"));
    }
    Ok(if tkhd.version()? == 1 {
        Field::U32(20)
    } else {
        Field::U32(12)
    })
}

/// Read the track id of a `tkhd` box
pub fn track_id(tkhd: &Mp4Box) -> Result<u32> {
    Ok(tkhd.field(track_id_field(tkhd)?)? as u32)
}

/// Clone a movie, media or track header with its duration set to zero
pub fn clear_duration(header: &Mp4Box) -> Result<Mp4Box> {
    header.with_field(duration_field(header)?, 0)
}

/// Sequence number field of an `mfhd` payload
pub const MFHD_SEQUENCE: Field = Field::U32(4);

/// Clone an `mfhd` with a new sequence number
pub fn with_sequence_number(mfhd: &Mp4Box, sequence: u32) -> Result<Mp4Box> {
    if &mfhd.box_type != b"mfhd" {
        return Err(Error::unexpected_value(&mfhd.box_type, "a sequence number"));
    }
    mfhd.with_field(MFHD_SEQUENCE, sequence as u64)
}

/// Base media decode time field of a `tfdt` payload
pub fn decode_time_field(tfdt: &Mp4Box) -> Result<Field> {
    if &tfdt.box_type != b"tfdt" {
        return Err(Error::unexpected_value(&tfdt.box_type, "a decode time"));
    }
    Ok(if tfdt.version()? == 1 {
        Field::U64(4)
    } else {
        Field::U32(4)
    })
}

/// Clone a `tfdt` with `offset` added to its base media decode time
pub fn with_decode_time_offset(tfdt: &Mp4Box, offset: u64) -> Result<Mp4Box> {
    let field = decode_time_field(tfdt)?;
    let original = tfdt.field(field)?;
    let shifted = original.checked_add(offset).ok_or_else(|| {
        Error::Remux(format!(
            "{} decode time {} + {} overflows",
            fourcc_str(&tfdt.box_type),
            original,
            offset
        ))
    })?;
    tfdt.with_field(field, shifted)
}
