//! Fragment reconstruction from raw sample tables
//!
//! Used when a chunk is a plain `moov` + `mdat` file. Each stored chunk of the
//! video track becomes one `trun`; the original `mdat` is kept as is and the
//! `trun` data offsets are relocated to point into it from the new `moof`.

use super::{tfdt_v1, trun_header, with_data_offsets, Remuxer};
use super::{TRUN_COMPOSITION_OFFSET, TRUN_DATA_OFFSET, TRUN_SAMPLE_DURATION, TRUN_SAMPLE_SIZE};
use crate::boxes::{BoxHeader, BoxList, Mp4Box};
use crate::init::{find_track, VIDEO_TRACK_ID};
use crate::sample_table::{Chunk, SampleTable};
use bytes::Bytes;
use chunkcast_core::{Error, Result, Segment, SessionState};
use tracing::{debug, trace};

/// Byte range of the `mdat` payload within the source file
#[derive(Debug, Clone, Copy)]
struct MdatSpan {
    /// Offset of the `mdat` header in the source
    start: u64,
    /// Header length of the emitted `mdat`
    header: u64,
    payload_start: u64,
    payload_end: u64,
}

impl MdatSpan {
    fn locate(file: &BoxList) -> Result<Self> {
        let mut start = 0;
        for b in file {
            if &b.box_type == b"mdat" {
                let len = b.payload()?.len() as u64;
                let source_header = b.byte_size() - len;
                return Ok(Self {
                    start,
                    header: BoxHeader::Compact.size_for(len),
                    payload_start: start + source_header,
                    payload_end: start + source_header + len,
                });
            }
            start += b.byte_size();
        }
        Err(Error::missing_box("mdat"))
    }

    /// Offset of a chunk from the start of the emitted `mdat` box
    fn relocate(&self, chunk: &Chunk, len: u64) -> Result<u64> {
        if chunk.offset < self.payload_start || chunk.offset + len > self.payload_end {
            return Err(Error::Remux(format!(
                "chunk at {}..{} lies outside mdat payload {}..{}",
                chunk.offset,
                chunk.offset + len,
                self.payload_start,
                self.payload_end
            )));
        }
        Ok(self.header + (chunk.offset - self.payload_start))
    }
}

/// Remuxer that rebuilds `tfhd`/`tfdt`/`trun` from `stts`/`ctts`/`stsz`/`stsc`/`stco`
#[derive(Debug, Default)]
pub struct ManualRemuxer;

impl ManualRemuxer {
    pub fn new() -> Self {
        Self
    }

    /// One `trun` per non-empty chunk, plus each chunk's offset from the
    /// start of the emitted `mdat`
    fn runs(table: &SampleTable, mdat: &MdatSpan) -> Result<(Vec<Vec<u32>>, Vec<u64>)> {
        let with_offsets = table.composition_offsets.is_some();
        let mut flags = TRUN_DATA_OFFSET | TRUN_SAMPLE_DURATION | TRUN_SAMPLE_SIZE;
        if with_offsets {
            flags |= TRUN_COMPOSITION_OFFSET;
        }

        let mut truns = Vec::new();
        let mut bases = Vec::new();
        for chunk in table.chunks()? {
            if chunk.sample_count == 0 {
                continue;
            }
            let samples = chunk.first_sample..chunk.first_sample + chunk.sample_count as usize;
            let negative = samples
                .clone()
                .any(|i| table.composition_offset(i).is_some_and(|o| o < 0));

            let mut words = trun_header(u8::from(negative), flags, chunk.sample_count);
            let mut len = 0u64;
            for i in samples {
                words.push(table.duration(i));
                words.push(table.size(i));
                if let Some(offset) = table.composition_offset(i) {
                    words.push(offset as u32);
                }
                len += table.size(i) as u64;
            }

            bases.push(mdat.relocate(&chunk, len)?);
            truns.push(words);
            trace!(
                "Chunk at {} holds {} samples ({} bytes)",
                chunk.offset,
                chunk.sample_count,
                len
            );
        }
        Ok((truns, bases))
    }
}

impl Remuxer for ManualRemuxer {
    fn name(&self) -> &'static str {
        "manual"
    }

    fn remux(&mut self, mp4: &Bytes, session: &mut SessionState) -> Result<Vec<Segment>> {
        let file = BoxList::parse(mp4.clone())?;
        let moov = file.require_children(b"moov")?;
        let stbl = find_track(moov, VIDEO_TRACK_ID)?
            .children()?
            .require_children(b"mdia")?
            .require_children(b"minf")?
            .require_children(b"stbl")?;
        let span = MdatSpan::locate(&file)?;
        let table = SampleTable::from_stbl(stbl, span.payload_end - span.payload_start)?;

        let (truns, bases) = Self::runs(&table, &span)?;
        if truns.is_empty() {
            debug!("Chunk has no video samples, no segment emitted");
            return Ok(Vec::new());
        }

        let sequence = session.next_segment_id();
        let decode_time = session.decode_time_offset();
        let build = |truns: &[Vec<u32>]| {
            let mut traf = vec![
                Mp4Box::typed(*b"tfhd", vec![0, VIDEO_TRACK_ID]),
                tfdt_v1(decode_time),
            ];
            traf.extend(truns.iter().map(|words| Mp4Box::typed(*b"trun", words.clone())));
            Mp4Box::container(
                *b"moof",
                vec![
                    Mp4Box::typed(*b"mfhd", vec![0, sequence]),
                    Mp4Box::container(*b"traf", traf),
                ],
            )
        };
        let moof = with_data_offsets(truns, &bases, build)?;

        let mdat = file.require(b"mdat")?.clone().compact();
        debug!(
            "Rebuilt fragment {} from {} samples (mdat at {} in source)",
            sequence,
            table.sample_count(),
            span.start
        );
        let data = BoxList::from(vec![moof, mdat]).to_bytes()?;
        session.take_segment_id()?;
        Ok(vec![Segment::media(data, sequence, decode_time)])
    }
}
