//! Synthetic chunks for tests

use async_trait::async_trait;
use bytes::Bytes;
use chunkcast_core::{ChunkEnvelope, Error, Result};
use chunkcast_mp4::{BoxList, Mp4Box};
use std::sync::{Arc, Mutex};

fn full_box(box_type: &[u8; 4], words: &[u32]) -> Mp4Box {
    let mut payload = vec![0u8; 4];
    for word in words {
        payload.extend_from_slice(&word.to_be_bytes());
    }
    Mp4Box::bytes(*box_type, payload)
}

fn zeroed(box_type: &[u8; 4], len: usize, words: &[(usize, u32)]) -> Mp4Box {
    let mut payload = vec![0u8; len];
    for (offset, word) in words {
        payload[*offset..offset + 4].copy_from_slice(&word.to_be_bytes());
    }
    Mp4Box::bytes(*box_type, payload)
}

fn movie(sizes: &[u32], base: u32) -> BoxList {
    let mut stsz = vec![0, sizes.len() as u32];
    stsz.extend_from_slice(sizes);
    let stbl = vec![
        full_box(b"stsd", &[1, 16, u32::from_be_bytes(*b"raw "), 0, 0]),
        full_box(b"stts", &[1, sizes.len() as u32, 512]),
        full_box(b"stsc", &[1, 1, sizes.len().max(1) as u32, 1]),
        full_box(b"stsz", &stsz),
        full_box(b"stco", &[1, base]),
    ];
    let mut hdlr = vec![0u8; 8];
    hdlr.extend_from_slice(b"vide");
    hdlr.extend_from_slice(&[0u8; 13]);

    let trak = Mp4Box::container(
        *b"trak",
        vec![
            zeroed(b"tkhd", 84, &[(12, 1), (20, 4096)]),
            Mp4Box::container(
                *b"mdia",
                vec![
                    zeroed(b"mdhd", 24, &[(12, 90000), (16, 4096)]),
                    Mp4Box::bytes(*b"hdlr", hdlr),
                    Mp4Box::container(
                        *b"minf",
                        vec![
                            full_box(b"vmhd", &[0, 0]),
                            Mp4Box::container(*b"dinf", vec![full_box(b"dref", &[0])]),
                            Mp4Box::container(*b"stbl", stbl),
                        ],
                    ),
                ],
            ),
        ],
    );
    let mdat: Vec<u8> = sizes
        .iter()
        .enumerate()
        .flat_map(|(i, &size)| std::iter::repeat(i as u8).take(size as usize))
        .collect();

    BoxList::from(vec![
        Mp4Box::bytes(*b"ftyp", b"isom\x00\x00\x02\x00".to_vec()),
        Mp4Box::container(
            *b"moov",
            vec![zeroed(b"mvhd", 100, &[(12, 1000), (16, 1000)]), trak],
        ),
        Mp4Box::bytes(*b"mdat", mdat),
    ])
}

/// A one-chunk, single-track MP4 file with samples of the given sizes
pub(crate) fn mp4_chunk(sizes: &[u32]) -> Bytes {
    let probe = movie(sizes, 0);
    let mdat_len: u32 = sizes.iter().sum();
    let base = (probe.byte_size() - mdat_len as u64) as u32;
    movie(sizes, base).to_bytes().unwrap()
}

/// An envelope carrying `mp4`
pub(crate) fn media_envelope(mp4: Bytes) -> Bytes {
    ChunkEnvelope::with_payload("container", "endpoint", mp4)
        .encode()
        .unwrap()
}

/// An envelope without events
pub(crate) fn empty_envelope() -> Bytes {
    let mut envelope = ChunkEnvelope::with_payload("container", "endpoint", Bytes::new());
    envelope.event_count = 0;
    envelope.event = None;
    envelope.encode().unwrap()
}

/// Sink that records every append
#[derive(Clone, Default)]
pub(crate) struct RecordingSink {
    pub appended: Arc<Mutex<Vec<Bytes>>>,
    pub plays: Arc<Mutex<usize>>,
}

#[async_trait]
impl crate::MediaSink for RecordingSink {
    async fn opened(&mut self) -> Result<()> {
        Ok(())
    }

    async fn append(&mut self, data: Bytes) -> Result<()> {
        self.appended
            .lock()
            .map_err(|_| Error::SinkClosed)?
            .push(data);
        Ok(())
    }

    async fn play(&mut self) -> Result<()> {
        *self.plays.lock().map_err(|_| Error::SinkClosed)? += 1;
        Ok(())
    }
}
