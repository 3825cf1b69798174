//! ISO BMFF box tree
//!
//! A parsed box keeps its payload as a zero-copy view into the source buffer
//! unless its type is a known container, in which case the payload is parsed
//! into child boxes. Unknown boxes are never interpreted, so serializing a
//! parsed tree reproduces the input byte for byte.

use bytes::Bytes;
use chunkcast_core::{Endian, Error, Reader, Result, Writer};

/// 4-byte box type
pub type FourCc = [u8; 4];

/// Box types whose payload is a list of child boxes
pub const CONTAINER_BOXES: [&FourCc; 11] = [
    b"moov", b"trak", b"edts", b"mdia", b"minf", b"dinf", b"stbl", b"mvex", b"udta", b"moof",
    b"traf",
];

const HEADER_SIZE: u64 = 8;
const LARGE_HEADER_SIZE: u64 = 16;

/// Whether boxes of this type are parsed as containers
pub fn is_container(box_type: &FourCc) -> bool {
    CONTAINER_BOXES.iter().any(|t| *t == box_type)
}

/// Printable form of a box type
pub fn fourcc_str(box_type: &FourCc) -> String {
    String::from_utf8_lossy(box_type).into_owned()
}

/// Payload of a box
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoxValue {
    /// Opaque payload, written back unchanged
    Bytes(Bytes),
    /// Child boxes of a container
    Children(BoxList),
    /// Big-endian 32-bit words, used for small synthesized boxes
    Typed(Vec<u32>),
}

impl BoxValue {
    fn byte_size(&self) -> u64 {
        match self {
            BoxValue::Bytes(data) => data.len() as u64,
            BoxValue::Children(children) => children.byte_size(),
            BoxValue::Typed(words) => 4 * words.len() as u64,
        }
    }
}

/// Size field form of a box header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BoxHeader {
    /// 32-bit size, widened to a 64-bit size once the box outgrows it
    #[default]
    Compact,
    /// Size 0: the box runs to the end of its enclosing buffer
    ToEnd,
    /// Size 1 followed by a 64-bit size
    Large,
}

impl BoxHeader {
    /// Header length in front of a payload of `payload_len` bytes
    pub fn size_for(self, payload_len: u64) -> u64 {
        match self {
            BoxHeader::Compact if payload_len + HEADER_SIZE > u32::MAX as u64 => LARGE_HEADER_SIZE,
            BoxHeader::Compact | BoxHeader::ToEnd => HEADER_SIZE,
            BoxHeader::Large => LARGE_HEADER_SIZE,
        }
    }
}

/// A single box: type plus payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mp4Box {
    pub box_type: FourCc,
    pub value: BoxValue,
    /// Header form the box was read with, kept so parsed input re-serializes unchanged
    pub header: BoxHeader,
}

impl Mp4Box {
    pub fn new(box_type: FourCc, value: BoxValue) -> Self {
        Self {
            box_type,
            value,
            header: BoxHeader::Compact,
        }
    }

    pub fn with_header(mut self, header: BoxHeader) -> Self {
        self.header = header;
        self
    }

    /// Same box with a plain size header, safe to place anywhere in a new list
    pub fn compact(self) -> Self {
        self.with_header(BoxHeader::Compact)
    }

    /// Box with an opaque payload
    pub fn bytes(box_type: FourCc, data: impl Into<Bytes>) -> Self {
        Self::new(box_type, BoxValue::Bytes(data.into()))
    }

    /// Container box
    pub fn container(box_type: FourCc, children: impl Into<BoxList>) -> Self {
        Self::new(box_type, BoxValue::Children(children.into()))
    }

    /// Box whose payload is a run of big-endian 32-bit words
    pub fn typed(box_type: FourCc, words: Vec<u32>) -> Self {
        Self::new(box_type, BoxValue::Typed(words))
    }

    /// Child list of a container box
    pub fn children(&self) -> Result<&BoxList> {
        match &self.value {
            BoxValue::Children(children) => Ok(children),
            _ => Err(Error::unexpected_value(&self.box_type, "child boxes")),
        }
    }

    /// Opaque payload of a leaf box
    pub fn payload(&self) -> Result<&Bytes> {
        match &self.value {
            BoxValue::Bytes(data) => Ok(data),
            _ => Err(Error::unexpected_value(&self.box_type, "a byte payload")),
        }
    }

    /// Full box version byte of a leaf payload
    pub fn version(&self) -> Result<u8> {
        let payload = self.payload()?;
        payload.first().copied().ok_or(Error::OutOfBounds {
            needed: 1,
            remaining: 0,
        })
    }

    /// Total size on the wire, header included
    pub fn byte_size(&self) -> u64 {
        let payload = self.value.byte_size();
        payload + self.header.size_for(payload)
    }

    /// Write the box; a compact size field is filled in once the payload is written
    pub fn serialize(&self, writer: &mut Writer) -> Result<()> {
        let start = writer.offset();
        let payload = self.value.byte_size();

        if self.header == BoxHeader::ToEnd {
            writer.write_u32(0u32, Endian::Big)?;
            writer.write_bytes(&self.box_type);
            return self.serialize_payload(writer);
        }
        if self.header.size_for(payload) == LARGE_HEADER_SIZE {
            writer.write_u32(1u32, Endian::Big)?;
            writer.write_bytes(&self.box_type);
            writer.write_u64(payload + LARGE_HEADER_SIZE, Endian::Big);
            return self.serialize_payload(writer);
        }

        let size_slot = writer.reserve_u32();
        writer.write_bytes(&self.box_type);
        self.serialize_payload(writer)?;
        let len = (writer.offset() - start) as u64;
        writer.patch_u32(size_slot, len, Endian::Big)
    }

    fn serialize_payload(&self, writer: &mut Writer) -> Result<()> {
        match &self.value {
            BoxValue::Bytes(data) => writer.write_bytes(data),
            BoxValue::Children(children) => children.serialize(writer)?,
            BoxValue::Typed(words) => {
                for word in words {
                    writer.write_u32(*word, Endian::Big)?;
                }
            }
        }
        Ok(())
    }

    /// Serialize this box on its own
    pub fn to_bytes(&self) -> Result<Bytes> {
        let mut writer = Writer::with_capacity(self.byte_size() as usize);
        self.serialize(&mut writer)?;
        Ok(writer.into_bytes())
    }
}

/// Ordered sibling boxes sharing one parent; duplicate types are allowed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BoxList {
    boxes: Vec<Mp4Box>,
}

impl BoxList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a run of boxes covering all of `data`
    pub fn parse(data: impl Into<Bytes>) -> Result<Self> {
        let mut reader = Reader::new(data);
        let mut boxes = Vec::new();

        while reader.has_data() {
            let size = reader.read_u32(Endian::Big)? as u64;
            let box_type = reader.read_fourcc()?;

            let (size, header, form) = match size {
                0 => (reader.remaining() as u64 + HEADER_SIZE, HEADER_SIZE, BoxHeader::ToEnd),
                1 => (reader.read_u64(Endian::Big)?, LARGE_HEADER_SIZE, BoxHeader::Large),
                _ => (size, HEADER_SIZE, BoxHeader::Compact),
            };
            if size < header {
                return Err(Error::InvalidBoxSize {
                    box_type: fourcc_str(&box_type),
                    size,
                });
            }

            let payload_len = size - header;
            if payload_len > reader.remaining() as u64 {
                return Err(Error::TruncatedBox {
                    box_type: fourcc_str(&box_type),
                    declared: size,
                    remaining: reader.remaining(),
                });
            }
            let payload = reader.read_slice(payload_len as usize)?;

            let value = if is_container(&box_type) {
                BoxValue::Children(BoxList::parse(payload)?)
            } else {
                BoxValue::Bytes(payload)
            };
            boxes.push(Mp4Box::new(box_type, value).with_header(form));
        }

        Ok(Self { boxes })
    }

    /// First box of the given type
    pub fn get(&self, box_type: &FourCc) -> Option<&Mp4Box> {
        self.boxes.iter().find(|b| &b.box_type == box_type)
    }

    /// All boxes of the given type, in order
    pub fn get_all<'a>(&'a self, box_type: &'a FourCc) -> impl Iterator<Item = &'a Mp4Box> + 'a {
        self.boxes.iter().filter(move |b| &b.box_type == box_type)
    }

    /// First box of the given type, or `MissingBox`
    pub fn require(&self, box_type: &FourCc) -> Result<&Mp4Box> {
        self.get(box_type)
            .ok_or_else(|| Error::missing_box(fourcc_str(box_type)))
    }

    /// Children of the first container of the given type
    pub fn require_children(&self, box_type: &FourCc) -> Result<&BoxList> {
        self.require(box_type)?.children()
    }

    pub fn push(&mut self, b: Mp4Box) {
        self.boxes.push(b);
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Mp4Box> {
        self.boxes.iter()
    }

    pub fn len(&self) -> usize {
        self.boxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }

    /// Sum of the wire sizes of all boxes
    pub fn byte_size(&self) -> u64 {
        self.boxes.iter().map(Mp4Box::byte_size).sum()
    }

    pub fn serialize(&self, writer: &mut Writer) -> Result<()> {
        for b in &self.boxes {
            b.serialize(writer)?;
        }
        Ok(())
    }

    /// Serialize all boxes into one buffer
    pub fn to_bytes(&self) -> Result<Bytes> {
        let mut writer = Writer::with_capacity(self.byte_size() as usize);
        self.serialize(&mut writer)?;
        Ok(writer.into_bytes())
    }
}

impl From<Vec<Mp4Box>> for BoxList {
    fn from(boxes: Vec<Mp4Box>) -> Self {
        Self { boxes }
    }
}

impl<'a> IntoIterator for &'a BoxList {
    type Item = &'a Mp4Box;
    type IntoIter = std::slice::Iter<'a, Mp4Box>;

    fn into_iter(self) -> Self::IntoIter {
        self.boxes.iter()
    }
}
