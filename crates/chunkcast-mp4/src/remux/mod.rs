//! Media segment remuxing
//!
//! A remuxer turns the MP4 payload of one chunk into zero or more `moof` +
//! `mdat` media segments. Every segment takes the session's next sequence
//! number and is based at the session's current decode time offset; the
//! caller advances the decode time once the segments are enqueued.

mod delegate;
mod fragmenter;
mod manual;

pub use delegate::DelegateRemuxer;
pub use fragmenter::{Fragmenter, SAMPLES_PER_FRAGMENT};
pub use manual::ManualRemuxer;

use crate::boxes::Mp4Box;
use bytes::Bytes;
use chunkcast_core::{Error, RemuxStrategy, Result, Segment, SessionState};

/// trun flag: data offset present
pub const TRUN_DATA_OFFSET: u32 = 0x000001;
/// trun flag: per-sample duration present
pub const TRUN_SAMPLE_DURATION: u32 = 0x000100;
/// trun flag: per-sample size present
pub const TRUN_SAMPLE_SIZE: u32 = 0x000200;
/// trun flag: per-sample flags present
pub const TRUN_SAMPLE_FLAGS: u32 = 0x000400;
/// trun flag: per-sample composition time offset present
pub const TRUN_COMPOSITION_OFFSET: u32 = 0x000800;

/// Index of the data offset word in a typed `trun`
const TRUN_DATA_OFFSET_WORD: usize = 2;

/// Converts chunk payloads into media segments
pub trait Remuxer: Send {
    /// Strategy name for logging
    fn name(&self) -> &'static str;

    /// Remux one chunk's MP4 bytes, drawing sequence numbers from `session`
    fn remux(&mut self, mp4: &Bytes, session: &mut SessionState) -> Result<Vec<Segment>>;
}

/// Create the remuxer for a configured strategy
pub fn remuxer_for(strategy: RemuxStrategy) -> Box<dyn Remuxer> {
    match strategy {
        RemuxStrategy::Delegate => Box::new(DelegateRemuxer::new()),
        RemuxStrategy::Manual => Box::new(ManualRemuxer::new()),
    }
}

/// Header words of a typed `trun`; the data offset is filled in later
fn trun_header(version: u8, flags: u32, sample_count: u32) -> Vec<u32> {
    vec![((version as u32) << 24) | flags, sample_count, 0]
}

/// `tfdt` version 1 carrying a 64-bit base media decode time
fn tfdt_v1(decode_time: u64) -> Mp4Box {
    Mp4Box::typed(
        *b"tfdt",
        vec![0x0100_0000, (decode_time >> 32) as u32, decode_time as u32],
    )
}

/// Build a `moof`, measure it, then rebuild with each `trun` data offset set
/// to `moof size + base(i)`.
///
/// `build` must lay out the same boxes for any data offset value.
fn with_data_offsets<F>(mut truns: Vec<Vec<u32>>, bases: &[u64], build: F) -> Result<Mp4Box>
where
    F: Fn(&[Vec<u32>]) -> Mp4Box,
{
    let moof_size = build(&truns).byte_size();
    for (words, base) in truns.iter_mut().zip(bases) {
        let offset = moof_size + base;
        let offset = i32::try_from(offset).map_err(|_| Error::Overflow(offset as i128))?;
        words[TRUN_DATA_OFFSET_WORD] = offset as u32;
    }
    Ok(build(&truns))
}
