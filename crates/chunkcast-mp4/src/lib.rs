//! chunkcast MP4 - box tree, init segment synthesis and fragment remuxing

pub mod boxes;
pub mod init;
pub mod patch;
pub mod remux;
pub mod sample_table;

pub use boxes::{BoxHeader, BoxList, BoxValue, FourCc, Mp4Box};
pub use init::{init_segment_bytes, synthesize_init_segment, VIDEO_TRACK_ID};
pub use remux::{remuxer_for, DelegateRemuxer, ManualRemuxer, Remuxer};
pub use sample_table::SampleTable;
