//! Remuxing through the fragmenting muxer
//!
//! The fragmenter derives `trun` entries for arbitrary sample layouts; this
//! remuxer only intercepts each emitted fragment and rewrites its sequence
//! number and base decode time.

use super::{Fragmenter, Remuxer};
use crate::boxes::{BoxList, Mp4Box};
use crate::init::VIDEO_TRACK_ID;
use crate::patch::{decode_time_field, with_decode_time_offset, with_sequence_number};
use bytes::Bytes;
use chunkcast_core::{Error, Result, Segment, SessionState};
use tracing::debug;

/// Remuxer that delegates fragmentation and patches the result
#[derive(Debug, Clone, Default)]
pub struct DelegateRemuxer {
    fragmenter: Fragmenter,
}

impl DelegateRemuxer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fragmenter(fragmenter: Fragmenter) -> Self {
        Self { fragmenter }
    }
}

/// Patched `traf` and the decode time written into its `tfdt`
fn patch_traf(traf: &BoxList, offset: u64) -> Result<(Mp4Box, u64)> {
    let mut decode_time = None;
    let mut children = BoxList::new();
    for b in traf {
        if &b.box_type == b"tfdt" {
            let tfdt = with_decode_time_offset(b, offset)?;
            decode_time = Some(tfdt.field(decode_time_field(&tfdt)?)?);
            children.push(tfdt);
        } else {
            children.push(b.clone());
        }
    }
    let decode_time = decode_time.ok_or_else(|| Error::missing_box("traf/tfdt"))?;
    Ok((Mp4Box::container(*b"traf", children), decode_time))
}

/// Rewrite the `mfhd` and every `tfdt` of one serialized fragment
fn patch_fragment(fragment: Bytes, session: &mut SessionState) -> Result<Segment> {
    let boxes = BoxList::parse(fragment)?;
    let moof = boxes.require_children(b"moof")?;
    moof.require(b"mfhd")?;

    // the id is only taken once the fragment is fully patched
    let sequence = session.next_segment_id();
    let offset = session.decode_time_offset();
    let mut decode_time = None;

    let mut patched_moof = BoxList::new();
    for b in moof {
        match &b.box_type {
            b"mfhd" => patched_moof.push(with_sequence_number(b, sequence)?),
            b"traf" => {
                let (traf, time) = patch_traf(b.children()?, offset)?;
                decode_time.get_or_insert(time);
                patched_moof.push(traf);
            }
            _ => patched_moof.push(b.clone()),
        }
    }
    let decode_time = decode_time.ok_or_else(|| Error::missing_box("moof/traf"))?;

    let mut out = BoxList::new();
    for b in &boxes {
        if &b.box_type == b"moof" {
            out.push(Mp4Box::container(*b"moof", patched_moof.clone()));
        } else {
            out.push(b.clone());
        }
    }

    let data = out.to_bytes()?;
    session.take_segment_id()?;
    Ok(Segment::media(data, sequence, decode_time))
}

impl Remuxer for DelegateRemuxer {
    fn name(&self) -> &'static str {
        "delegate"
    }

    fn remux(&mut self, mp4: &Bytes, session: &mut SessionState) -> Result<Vec<Segment>> {
        let fragments = self.fragmenter.fragment(mp4, VIDEO_TRACK_ID)?;
        if fragments.is_empty() {
            debug!("Chunk has no video samples, no segment emitted");
        }
        fragments
            .into_iter()
            .map(|fragment| patch_fragment(fragment, session))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::MFHD_SEQUENCE;
    use crate::remux::manual::tests::chunk_file;
    use crate::remux::tests::resolve_samples;

    fn header_fields(segment: &Segment) -> (u64, u64) {
        let boxes = BoxList::parse(segment.data.clone()).unwrap();
        let moof = boxes.require_children(b"moof").unwrap();
        let sequence = moof.require(b"mfhd").unwrap().field(MFHD_SEQUENCE).unwrap();
        let tfdt = moof
            .require_children(b"traf")
            .unwrap()
            .require(b"tfdt")
            .unwrap();
        (sequence, tfdt.field(decode_time_field(tfdt).unwrap()).unwrap())
    }

    #[test]
    fn test_sequence_numbers_are_consecutive() {
        let file = chunk_file(&[3, 4, 5], 2, None);
        let mut session = SessionState::new();
        let mut remuxer = DelegateRemuxer::new();

        let mut sequences = Vec::new();
        for _ in 0..4 {
            for segment in remuxer.remux(&file, &mut session).unwrap() {
                sequences.push(header_fields(&segment).0);
                assert_eq!(Some(sequences.len() as u32 - 1), segment.sequence());
            }
            session.advance_decode_time(16000);
        }
        assert_eq!(sequences, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_decode_time_is_offset_plus_original() {
        let file = chunk_file(&[1, 1, 1, 1], 4, None);
        let mut session = SessionState::new();
        session.advance_decode_time(32000);

        let mut remuxer = DelegateRemuxer::with_fragmenter(Fragmenter::new(2));
        let segments = remuxer.remux(&file, &mut session).unwrap();
        let fields: Vec<_> = segments.iter().map(header_fields).collect();
        assert_eq!(fields, vec![(0, 32000), (1, 32020)]);
        assert_eq!(segments[1].kind, chunkcast_core::SegmentKind::Media { sequence: 1, decode_time: 32020 });
    }

    #[test]
    fn test_patching_keeps_sample_data() {
        let sizes = [5u32, 2, 9];
        let file = chunk_file(&sizes, 1, Some(&[0, 10, 0]));
        let segments = DelegateRemuxer::new()
            .remux(&file, &mut SessionState::new())
            .unwrap();
        let samples = resolve_samples(&segments[0].data);
        assert_eq!(samples.iter().map(|s| s.len() as u32).collect::<Vec<_>>(), sizes.to_vec());
        assert!(samples[2].iter().all(|b| *b == 2));
    }

    #[test]
    fn test_fragment_without_mfhd_is_rejected() {
        let fragment = BoxList::from(vec![Mp4Box::container(*b"moof", BoxList::new())])
            .to_bytes()
            .unwrap();
        let mut session = SessionState::new();
        assert!(matches!(
            patch_fragment(fragment, &mut session),
            Err(Error::MissingBox(t)) if t == "mfhd"
        ));
        assert_eq!(session.next_segment_id(), 0);
    }

    #[test]
    fn test_fragment_without_tfdt_keeps_sequence() {
        let fragment = BoxList::from(vec![Mp4Box::container(
            *b"moof",
            vec![
                Mp4Box::typed(*b"mfhd", vec![0, 7]),
                Mp4Box::container(*b"traf", vec![Mp4Box::typed(*b"tfhd", vec![0, 1])]),
            ],
        )])
        .to_bytes()
        .unwrap();
        let mut session = SessionState::new();
        assert!(matches!(
            patch_fragment(fragment, &mut session),
            Err(Error::MissingBox(t)) if t == "traf/tfdt"
        ));
        assert_eq!(session.next_segment_id(), 0);
    }

    #[test]
    fn test_exhausted_sequence_space_is_an_error() {
        let file = chunk_file(&[3], 1, None);
        let mut session = SessionState::new().with_next_segment_id(u32::MAX);
        let err = DelegateRemuxer::new().remux(&file, &mut session).unwrap_err();
        assert!(matches!(err, Error::Overflow(_)), "{:?}", err);
    }

    #[test]
    fn test_empty_track_emits_nothing() {
        let file = chunk_file(&[], 1, None);
        let mut session = SessionState::new();
        assert!(DelegateRemuxer::new().remux(&file, &mut session).unwrap().is_empty());
        assert_eq!(session.next_segment_id(), 0);
    }
}
