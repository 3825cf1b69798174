//! Fragmenting muxer backed by the `mp4` crate's demuxer
//!
//! Samples of one track are read through `mp4::Mp4Reader` and written out as
//! self-contained `moof` + `mdat` fragments. Fragments carry placeholder
//! sequence numbers and the chunk's own decode times; the delegate remuxer
//! rewrites both.

use super::{tfdt_v1, trun_header, with_data_offsets};
use super::{TRUN_COMPOSITION_OFFSET, TRUN_DATA_OFFSET, TRUN_SAMPLE_DURATION, TRUN_SAMPLE_FLAGS, TRUN_SAMPLE_SIZE};
use crate::boxes::{BoxList, Mp4Box};
use bytes::{Bytes, BytesMut};
use chunkcast_core::{Error, Result};
use mp4::{Mp4Reader, Mp4Sample};
use std::io::Cursor;
use tracing::debug;

/// Samples grouped into one fragment
pub const SAMPLES_PER_FRAGMENT: u32 = 1000;

/// tfhd flag: data offsets are relative to the enclosing moof
const TFHD_DEFAULT_BASE_IS_MOOF: u32 = 0x020000;

/// Sample flags for a sync sample (depends on nothing)
const SYNC_SAMPLE_FLAGS: u32 = 0x0200_0000;
/// Sample flags for a non-sync sample (depends on others, non-sync)
const NON_SYNC_SAMPLE_FLAGS: u32 = 0x0101_0000;

fn remux_error(err: mp4::Error) -> Error {
    Error::Remux(err.to_string())
}

/// Splits a non-fragmented file into fragments of one track
#[derive(Debug, Clone)]
pub struct Fragmenter {
    samples_per_fragment: u32,
}

impl Default for Fragmenter {
    fn default() -> Self {
        Self::new(SAMPLES_PER_FRAGMENT)
    }
}

impl Fragmenter {
    pub fn new(samples_per_fragment: u32) -> Self {
        Self {
            samples_per_fragment: samples_per_fragment.max(1),
        }
    }

    /// Fragment every sample of `track_id`, returning serialized `[moof, mdat]` pairs
    pub fn fragment(&self, mp4: &Bytes, track_id: u32) -> Result<Vec<Bytes>> {
        let size = mp4.len() as u64;
        let mut reader = Mp4Reader::read_header(Cursor::new(mp4.clone()), size).map_err(remux_error)?;

        let sample_count = reader
            .tracks()
            .get(&track_id)
            .map(|track| track.sample_count())
            .ok_or_else(|| Error::missing_box(format!("trak with track id {}", track_id)))?;

        let mut fragments = Vec::new();
        let mut first = 1u32;
        while first <= sample_count {
            let last = first
                .saturating_add(self.samples_per_fragment - 1)
                .min(sample_count);
            let mut samples = Vec::with_capacity((last - first + 1) as usize);
            for sample_id in first..=last {
                match reader.read_sample(track_id, sample_id).map_err(remux_error)? {
                    Some(sample) => samples.push(sample),
                    None => {
                        return Err(Error::Remux(format!(
                            "sample {} of track {} is not stored in the file",
                            sample_id, track_id
                        )))
                    }
                }
            }
            fragments.push(build_fragment(track_id, &samples)?);

            if last == u32::MAX {
                break;
            }
            first = last + 1;
        }

        debug!(
            "Fragmented {} samples of track {} into {} fragments",
            sample_count,
            track_id,
            fragments.len()
        );
        Ok(fragments)
    }
}

fn sample_flags(sample: &Mp4Sample) -> u32 {
    if sample.is_sync {
        SYNC_SAMPLE_FLAGS
    } else {
        NON_SYNC_SAMPLE_FLAGS
    }
}

fn build_fragment(track_id: u32, samples: &[Mp4Sample]) -> Result<Bytes> {
    let negative = samples.iter().any(|s| s.rendering_offset < 0);
    let flags = TRUN_DATA_OFFSET
        | TRUN_SAMPLE_DURATION
        | TRUN_SAMPLE_SIZE
        | TRUN_SAMPLE_FLAGS
        | TRUN_COMPOSITION_OFFSET;

    let mut trun = trun_header(u8::from(negative), flags, samples.len() as u32);
    let mut data = BytesMut::with_capacity(samples.iter().map(|s| s.bytes.len()).sum());
    for sample in samples {
        trun.push(sample.duration);
        trun.push(sample.bytes.len() as u32);
        trun.push(sample_flags(sample));
        trun.push(sample.rendering_offset as u32);
        data.extend_from_slice(&sample.bytes);
    }

    let mdat = Mp4Box::bytes(*b"mdat", data.freeze());
    let mdat_header = mdat.byte_size() - mdat.payload()?.len() as u64;
    let decode_time = samples.first().map(|s| s.start_time).unwrap_or(0);

    let build = |truns: &[Vec<u32>]| {
        let mut traf = vec![
            Mp4Box::typed(*b"tfhd", vec![TFHD_DEFAULT_BASE_IS_MOOF, track_id]),
            tfdt_v1(decode_time),
        ];
        traf.extend(truns.iter().map(|words| Mp4Box::typed(*b"trun", words.clone())));
        Mp4Box::container(
            *b"moof",
            vec![
                Mp4Box::typed(*b"mfhd", vec![0, 1]),
                Mp4Box::container(*b"traf", traf),
            ],
        )
    };
    let moof = with_data_offsets(vec![trun], &[mdat_header], build)?;

    BoxList::from(vec![moof, mdat]).to_bytes()
}
