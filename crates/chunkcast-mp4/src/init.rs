//! Initialization segment synthesis
//!
//! Turns the `moov` of a non-fragmented file into one a fragmented stream can
//! start from: durations are cleared, an `mvex/trex` is added, the sample
//! tables are emptied and every track except the video track is dropped.

use crate::boxes::{BoxList, Mp4Box};
use crate::patch::{clear_duration, track_id};
use bytes::Bytes;
use chunkcast_core::{Error, Result};
use tracing::debug;

/// Track id of the video track carried by the stream
pub const VIDEO_TRACK_ID: u32 = 1;

/// Default sample flags advertised by `trex` (non-sync sample)
const TREX_DEFAULT_SAMPLE_FLAGS: u32 = 0x0001_0000;
const TREX_DEFAULT_SAMPLE_DURATION: u32 = 1000;

/// Find the `trak` whose `tkhd` carries `id`
pub fn find_track(moov: &BoxList, id: u32) -> Result<&Mp4Box> {
    for trak in moov.get_all(b"trak") {
        let tkhd = trak.children()?.require(b"tkhd")?;
        if track_id(tkhd)? == id {
            return Ok(trak);
        }
    }
    Err(Error::missing_box(format!("trak with track id {}", id)))
}

fn trex() -> Mp4Box {
    Mp4Box::typed(
        *b"trex",
        vec![
            0, // version + flags
            VIDEO_TRACK_ID,
            1, // default sample description index
            TREX_DEFAULT_SAMPLE_DURATION,
            0, // default sample size
            TREX_DEFAULT_SAMPLE_FLAGS,
        ],
    )
}

fn empty_stbl(stbl: &BoxList) -> Result<Mp4Box> {
    Ok(Mp4Box::container(
        *b"stbl",
        vec![
            stbl.require(b"stsd")?.clone().compact(),
            Mp4Box::typed(*b"stts", vec![0, 0]),
            Mp4Box::typed(*b"stsc", vec![0, 0]),
            Mp4Box::typed(*b"stsz", vec![0, 0, 0]),
            Mp4Box::typed(*b"stco", vec![0, 0]),
        ],
    ))
}

fn video_trak(trak: &Mp4Box) -> Result<Mp4Box> {
    let trak = trak.children()?;
    let mdia = trak.require_children(b"mdia")?;
    let minf = mdia.require_children(b"minf")?;

    let minf = Mp4Box::container(
        *b"minf",
        vec![
            minf.require(b"vmhd")?.clone().compact(),
            minf.require(b"dinf")?.clone().compact(),
            empty_stbl(minf.require_children(b"stbl")?)?,
        ],
    );
    let mdia = Mp4Box::container(
        *b"mdia",
        vec![
            clear_duration(mdia.require(b"mdhd")?)?,
            mdia.require(b"hdlr")?.clone().compact(),
            minf,
        ],
    );

    Ok(Mp4Box::container(
        *b"trak",
        vec![clear_duration(trak.require(b"tkhd")?)?, mdia],
    ))
}

/// Build `[ftyp, moov]` for a fragmented stream from a parsed non-fragmented file
pub fn synthesize_init_segment(file: &BoxList) -> Result<BoxList> {
    let ftyp = file.require(b"ftyp")?.clone().compact();
    let moov = file.require_children(b"moov")?;

    let trak = find_track(moov, VIDEO_TRACK_ID)?;
    let moov = Mp4Box::container(
        *b"moov",
        vec![
            clear_duration(moov.require(b"mvhd")?)?,
            Mp4Box::container(*b"mvex", vec![trex()]),
            video_trak(trak)?,
        ],
    );

    let dropped = file
        .require_children(b"moov")?
        .get_all(b"trak")
        .count()
        .saturating_sub(1);
    debug!("Synthesized init segment, dropped {} non-video tracks", dropped);

    Ok(BoxList::from(vec![ftyp, moov]))
}

/// Parse `mp4` and serialize its init segment
pub fn init_segment_bytes(mp4: &Bytes) -> Result<Bytes> {
    let file = BoxList::parse(mp4.clone())?;
    synthesize_init_segment(&file)?.to_bytes()
}
