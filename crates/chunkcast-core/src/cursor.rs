//! Sequential byte cursor with explicit endianness
//!
//! MP4 internals are big-endian while the chunk envelope around them is
//! little-endian, so every multi-byte access names its byte order.

use crate::{Error, Result};
use bytes::{BufMut, Bytes, BytesMut};

/// Length byte reserved by the envelope string codec
pub const RESERVED_STRING_LENGTH: u8 = 254;

/// Byte order of a single read or write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Big,
    Little,
}

/// Forward-only reader over a shared byte buffer
#[derive(Debug, Clone)]
pub struct Reader {
    data: Bytes,
    offset: usize,
}

impl Reader {
    /// Create a reader positioned at the start of `data`
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            offset: 0,
        }
    }

    /// Current read position
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Bytes left to read
    pub fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }

    /// Whether any bytes are left
    pub fn has_data(&self) -> bool {
        self.offset < self.data.len()
    }

    fn take(&mut self, len: usize) -> Result<&[u8]> {
        let remaining = self.remaining();
        if len > remaining {
            return Err(Error::OutOfBounds {
                needed: len,
                remaining,
            });
        }
        let start = self.offset;
        self.offset += len;
        Ok(&self.data[start..start + len])
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take_array::<1>()?[0])
    }

    pub fn read_u32(&mut self, endian: Endian) -> Result<u32> {
        let raw = self.take_array::<4>()?;
        Ok(match endian {
            Endian::Big => u32::from_be_bytes(raw),
            Endian::Little => u32::from_le_bytes(raw),
        })
    }

    pub fn read_i32(&mut self, endian: Endian) -> Result<i32> {
        let raw = self.take_array::<4>()?;
        Ok(match endian {
            Endian::Big => i32::from_be_bytes(raw),
            Endian::Little => i32::from_le_bytes(raw),
        })
    }

    pub fn read_u64(&mut self, endian: Endian) -> Result<u64> {
        let raw = self.take_array::<8>()?;
        Ok(match endian {
            Endian::Big => u64::from_be_bytes(raw),
            Endian::Little => u64::from_le_bytes(raw),
        })
    }

    /// Read `len` bytes as an ASCII string (bytes above 0x7f map to Latin-1)
    pub fn read_ascii(&mut self, len: usize) -> Result<String> {
        Ok(self.take(len)?.iter().map(|&b| b as char).collect())
    }

    /// Read a 4-byte box type
    pub fn read_fourcc(&mut self) -> Result<[u8; 4]> {
        self.take_array::<4>()
    }

    /// Read a length-prefixed string padded to a 4-byte boundary.
    ///
    /// Layout: 1 length byte, `len` ASCII bytes, then zero padding so that
    /// `1 + len + padding` is a multiple of 4.
    pub fn read_length_prefixed_string(&mut self) -> Result<String> {
        let len = self.read_u8()?;
        if len == RESERVED_STRING_LENGTH {
            return Err(Error::InvalidLength(len));
        }
        let value = self.read_ascii(len as usize)?;
        let padding = padding_after(1 + len as usize);
        self.skip(padding)?;
        Ok(value)
    }

    /// Return a zero-copy view of the next `len` bytes
    pub fn read_slice(&mut self, len: usize) -> Result<Bytes> {
        let remaining = self.remaining();
        if len > remaining {
            return Err(Error::OutOfBounds {
                needed: len,
                remaining,
            });
        }
        let slice = self.data.slice(self.offset..self.offset + len);
        self.offset += len;
        Ok(slice)
    }

    /// Return a zero-copy view of everything left
    pub fn read_rest(&mut self) -> Bytes {
        let rest = self.data.slice(self.offset..);
        self.offset = self.data.len();
        rest
    }

    pub fn skip(&mut self, len: usize) -> Result<()> {
        self.take(len).map(|_| ())
    }
}

/// Growable writer with explicit endianness and checked 32-bit fields
#[derive(Debug, Default)]
pub struct Writer {
    buf: BytesMut,
}

impl Writer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a writer with room for `capacity` bytes
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    /// Bytes written so far; also the current write position
    pub fn offset(&self) -> usize {
        self.buf.len()
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buf.put_u8(value);
    }

    /// Write an unsigned 32-bit field, rejecting values outside `0..=u32::MAX`
    pub fn write_u32(&mut self, value: impl Into<i128>, endian: Endian) -> Result<()> {
        let value = value.into();
        let value = u32::try_from(value).map_err(|_| Error::Overflow(value))?;
        match endian {
            Endian::Big => self.buf.put_u32(value),
            Endian::Little => self.buf.put_u32_le(value),
        }
        Ok(())
    }

    /// Write a signed 32-bit field, rejecting values outside the `i32` range
    pub fn write_i32(&mut self, value: impl Into<i128>, endian: Endian) -> Result<()> {
        let value = value.into();
        let value = i32::try_from(value).map_err(|_| Error::Overflow(value))?;
        match endian {
            Endian::Big => self.buf.put_i32(value),
            Endian::Little => self.buf.put_i32_le(value),
        }
        Ok(())
    }

    pub fn write_u64(&mut self, value: u64, endian: Endian) {
        match endian {
            Endian::Big => self.buf.put_u64(value),
            Endian::Little => self.buf.put_u64_le(value),
        }
    }

    pub fn write_bytes(&mut self, data: &[u8]) {
        self.buf.put_slice(data);
    }

    /// Write an ASCII string without any length prefix
    pub fn write_ascii(&mut self, value: &str) -> Result<()> {
        if !value.is_ascii() {
            return Err(Error::NonAscii(value.to_string()));
        }
        self.buf.put_slice(value.as_bytes());
        Ok(())
    }

    /// Write a length-prefixed string padded to a 4-byte boundary
    pub fn write_length_prefixed_string(&mut self, value: &str) -> Result<()> {
        if !value.is_ascii() {
            return Err(Error::NonAscii(value.to_string()));
        }
        let len = u8::try_from(value.len())
            .ok()
            .filter(|&len| len != RESERVED_STRING_LENGTH)
            .ok_or(Error::Overflow(value.len() as i128))?;
        self.buf.put_u8(len);
        self.buf.put_slice(value.as_bytes());
        self.buf.put_bytes(0, padding_after(1 + len as usize));
        Ok(())
    }

    /// Reserve a 4-byte slot to be filled in later with [`Writer::patch_u32`]
    pub fn reserve_u32(&mut self) -> usize {
        let position = self.buf.len();
        self.buf.put_u32(0);
        position
    }

    /// Overwrite a previously written 32-bit field at `position`
    pub fn patch_u32(&mut self, position: usize, value: impl Into<i128>, endian: Endian) -> Result<()> {
        let value = value.into();
        let value = u32::try_from(value).map_err(|_| Error::Overflow(value))?;
        let remaining = self.buf.len().saturating_sub(position);
        let slot = self
            .buf
            .get_mut(position..position + 4)
            .ok_or(Error::OutOfBounds {
                needed: 4,
                remaining,
            })?;
        match endian {
            Endian::Big => slot.copy_from_slice(&value.to_be_bytes()),
            Endian::Little => slot.copy_from_slice(&value.to_le_bytes()),
        }
        Ok(())
    }

    /// Finish writing and hand out the buffer
    pub fn into_bytes(self) -> Bytes {
        self.buf.freeze()
    }
}

/// Padding needed after `consumed` bytes to reach a 4-byte boundary
fn padding_after(consumed: usize) -> usize {
    (4 - consumed % 4) % 4
}
