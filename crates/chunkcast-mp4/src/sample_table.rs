//! Sample table expansion (stts, ctts, stsz, stsc, stco/co64)
//!
//! The run-length tables of a non-fragmented track are expanded into
//! per-sample durations, sizes and composition offsets, and the samples are
//! partitioned into the chunks they are stored in.

use crate::boxes::{BoxList, Mp4Box};
use chunkcast_core::{Endian, Error, Reader, Result};

/// One sample-to-chunk run from `stsc`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRun {
    /// 1-based index of the first chunk this run applies to
    pub first_chunk: u32,
    pub samples_per_chunk: u32,
    pub sample_description_index: u32,
}

/// Sample sizes from `stsz`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SampleSizes {
    Uniform { size: u32, count: u32 },
    PerSample(Vec<u32>),
}

impl SampleSizes {
    pub fn count(&self) -> u32 {
        match self {
            SampleSizes::Uniform { count, .. } => *count,
            SampleSizes::PerSample(sizes) => sizes.len() as u32,
        }
    }

    /// Bytes taken by all samples together
    pub fn total_bytes(&self) -> u64 {
        match self {
            SampleSizes::Uniform { size, count } => *size as u64 * *count as u64,
            SampleSizes::PerSample(sizes) => sizes.iter().map(|&s| s as u64).sum(),
        }
    }

    pub fn get(&self, index: usize) -> Option<u32> {
        match self {
            SampleSizes::Uniform { size, count } => (index < *count as usize).then_some(*size),
            SampleSizes::PerSample(sizes) => sizes.get(index).copied(),
        }
    }
}

/// A chunk and the samples stored in it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    /// Byte offset of the chunk in the source file
    pub offset: u64,
    /// Index of the chunk's first sample
    pub first_sample: usize,
    pub sample_count: u32,
}

/// Expanded sample table of one track
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleTable {
    pub sizes: SampleSizes,
    pub durations: Vec<u32>,
    /// Per-sample composition offsets; `None` when the track has no `ctts`
    pub composition_offsets: Option<Vec<i32>>,
    pub chunk_offsets: Vec<u64>,
    pub chunk_runs: Vec<ChunkRun>,
}

/// Expand `(count, value)` runs into one value per sample
pub fn expand_runs<T: Copy>(runs: &[(u32, T)]) -> Vec<T> {
    expand_runs_up_to(runs, usize::MAX)
}

/// Expand runs, stopping after `limit` values
pub fn expand_runs_up_to<T: Copy>(runs: &[(u32, T)], limit: usize) -> Vec<T> {
    runs.iter()
        .flat_map(|&(count, value)| std::iter::repeat(value).take(count as usize))
        .take(limit)
        .collect()
}

/// Number of samples stored in each chunk.
///
/// Chunks are walked in ascending order; a run takes effect at its
/// `first_chunk` and holds until the next run starts. The final chunk may be
/// short when the runs describe more samples than the track has.
pub fn chunk_sample_counts(runs: &[ChunkRun], chunk_count: usize, sample_count: u32) -> Result<Vec<u32>> {
    let mut counts = Vec::with_capacity(chunk_count);
    let mut next_run = 0;
    let mut samples_per_chunk = 0;
    let mut remaining = sample_count;

    for chunk_index in 1..=chunk_count as u64 {
        while next_run < runs.len() && runs[next_run].first_chunk as u64 <= chunk_index {
            samples_per_chunk = runs[next_run].samples_per_chunk;
            next_run += 1;
        }
        let count = samples_per_chunk.min(remaining);
        remaining -= count;
        counts.push(count);
    }

    if remaining > 0 {
        return Err(Error::Remux(format!(
            "sample-to-chunk table places {} of {} samples",
            sample_count - remaining,
            sample_count
        )));
    }
    Ok(counts)
}

fn table_reader(b: &Mp4Box) -> Result<(u8, Reader)> {
    let mut reader = Reader::new(b.payload()?.clone());
    let version = reader.read_u8()?;
    reader.skip(3)?;
    Ok((version, reader))
}

fn parse_stts(stts: &Mp4Box) -> Result<Vec<(u32, u32)>> {
    let (_, mut reader) = table_reader(stts)?;
    let entries = reader.read_u32(Endian::Big)?;
    (0..entries)
        .map(|_| -> Result<(u32, u32)> {
            Ok((reader.read_u32(Endian::Big)?, reader.read_u32(Endian::Big)?))
        })
        .collect()
}

fn parse_ctts(ctts: &Mp4Box) -> Result<Vec<(u32, i32)>> {
    // version 0 stores unsigned offsets, version 1 signed; both fit the same bits
    let (_, mut reader) = table_reader(ctts)?;
    let entries = reader.read_u32(Endian::Big)?;
    (0..entries)
        .map(|_| -> Result<(u32, i32)> {
            Ok((reader.read_u32(Endian::Big)?, reader.read_i32(Endian::Big)?))
        })
        .collect()
}

fn parse_stsz(stsz: &Mp4Box) -> Result<SampleSizes> {
    let (_, mut reader) = table_reader(stsz)?;
    let size = reader.read_u32(Endian::Big)?;
    let count = reader.read_u32(Endian::Big)?;
    if size != 0 {
        return Ok(SampleSizes::Uniform { size, count });
    }
    let sizes = (0..count)
        .map(|_| reader.read_u32(Endian::Big))
        .collect::<Result<Vec<_>>>()?;
    Ok(SampleSizes::PerSample(sizes))
}

fn parse_stsc(stsc: &Mp4Box) -> Result<Vec<ChunkRun>> {
    let (_, mut reader) = table_reader(stsc)?;
    let entries = reader.read_u32(Endian::Big)?;
    (0..entries)
        .map(|_| -> Result<ChunkRun> {
            Ok(ChunkRun {
                first_chunk: reader.read_u32(Endian::Big)?,
                samples_per_chunk: reader.read_u32(Endian::Big)?,
                sample_description_index: reader.read_u32(Endian::Big)?,
            })
        })
        .collect()
}

fn parse_chunk_offsets(b: &Mp4Box) -> Result<Vec<u64>> {
    let wide = &b.box_type == b"co64";
    let (_, mut reader) = table_reader(b)?;
    let entries = reader.read_u32(Endian::Big)?;
    (0..entries)
        .map(|_| {
            if wide {
                reader.read_u64(Endian::Big)
            } else {
                reader.read_u32(Endian::Big).map(u64::from)
            }
        })
        .collect()
}

impl SampleTable {
    /// Read and expand the sample tables of an `stbl` whose sample data
    /// occupies at most `data_len` bytes.
    ///
    /// Sample counts are checked against `data_len` before any per-sample
    /// table is expanded.
    pub fn from_stbl(stbl: &BoxList, data_len: u64) -> Result<Self> {
        let sizes = parse_stsz(stbl.require(b"stsz")?)?;
        let needed = sizes.total_bytes();
        if needed > data_len {
            return Err(Error::Remux(format!(
                "{} samples need {} bytes, sample data holds {}",
                sizes.count(),
                needed,
                data_len
            )));
        }
        let count = sizes.count() as usize;
        let durations = expand_runs_up_to(&parse_stts(stbl.require(b"stts")?)?, count);
        let composition_offsets = match stbl.get(b"ctts") {
            Some(ctts) => Some(expand_runs_up_to(&parse_ctts(ctts)?, count)),
            None => None,
        };
        let offsets_box = match stbl.get(b"stco") {
            Some(stco) => stco,
            None => stbl
                .get(b"co64")
                .ok_or_else(|| Error::missing_box("stco"))?,
        };
        let chunk_offsets = parse_chunk_offsets(offsets_box)?;
        let chunk_runs = parse_stsc(stbl.require(b"stsc")?)?;

        let table = Self {
            sizes,
            durations,
            composition_offsets,
            chunk_offsets,
            chunk_runs,
        };
        table.validate()?;
        Ok(table)
    }

    pub fn sample_count(&self) -> u32 {
        self.sizes.count()
    }

    fn validate(&self) -> Result<()> {
        let count = self.sample_count() as usize;
        if self.durations.len() < count {
            return Err(Error::Remux(format!(
                "time-to-sample table covers {} of {} samples",
                self.durations.len(),
                count
            )));
        }
        if let Some(offsets) = &self.composition_offsets {
            if offsets.len() < count {
                return Err(Error::Remux(format!(
                    "composition offset table covers {} of {} samples",
                    offsets.len(),
                    count
                )));
            }
        }
        if self.chunk_offsets.windows(2).any(|w| w[0] >= w[1]) {
            return Err(Error::Remux("chunk offsets are not increasing".to_string()));
        }
        Ok(())
    }

    /// Partition the samples into their chunks
    pub fn chunks(&self) -> Result<Vec<Chunk>> {
        let counts = chunk_sample_counts(&self.chunk_runs, self.chunk_offsets.len(), self.sample_count())?;
        let mut first_sample = 0;
        Ok(self
            .chunk_offsets
            .iter()
            .zip(counts)
            .map(|(&offset, sample_count)| {
                let chunk = Chunk {
                    offset,
                    first_sample,
                    sample_count,
                };
                first_sample += sample_count as usize;
                chunk
            })
            .collect())
    }

    /// Size of the sample at `index`
    pub fn size(&self, index: usize) -> u32 {
        self.sizes.get(index).unwrap_or(0)
    }

    /// Duration of the sample at `index`
    pub fn duration(&self, index: usize) -> u32 {
        self.durations.get(index).copied().unwrap_or(0)
    }

    /// Composition offset of the sample at `index`, if the track has any
    pub fn composition_offset(&self, index: usize) -> Option<i32> {
        self.composition_offsets
            .as_ref()
            .map(|offsets| offsets.get(index).copied().unwrap_or(0))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn full_box(box_type: &[u8; 4], words: &[u32]) -> Mp4Box {
        let mut payload = vec![0u8; 4];
        for word in words {
            payload.extend_from_slice(&word.to_be_bytes());
        }
        Mp4Box::bytes(*box_type, payload)
    }

    fn stbl(with_ctts: bool) -> BoxList {
        let mut boxes = vec![
            full_box(b"stsd", &[0]),
            full_box(b"stts", &[2, 3, 10, 2, 20]),
            full_box(b"stsc", &[1, 1, 2, 1]),
            full_box(b"stsz", &[0, 5, 100, 200, 300, 400, 500]),
            full_box(b"stco", &[3, 48, 348, 748]),
        ];
        if with_ctts {
            boxes.push(full_box(b"ctts", &[2, 1, 20, 4, 0]));
        }
        BoxList::from(boxes)
    }

    #[test]
    fn test_expand_time_to_sample() {
        assert_eq!(expand_runs(&[(3, 10u32), (2, 20)]), vec![10, 10, 10, 20, 20]);
        assert!(expand_runs::<u32>(&[]).is_empty());
    }

    #[test]
    fn test_chunk_grouping_single_run() {
        let runs = [ChunkRun {
            first_chunk: 1,
            samples_per_chunk: 2,
            sample_description_index: 1,
        }];
        assert_eq!(chunk_sample_counts(&runs, 3, 5).unwrap(), vec![2, 2, 1]);
    }

    #[test]
    fn test_chunk_grouping_multiple_runs() {
        let runs = [
            ChunkRun {
                first_chunk: 1,
                samples_per_chunk: 3,
                sample_description_index: 1,
            },
            ChunkRun {
                first_chunk: 3,
                samples_per_chunk: 1,
                sample_description_index: 1,
            },
        ];
        assert_eq!(chunk_sample_counts(&runs, 4, 8).unwrap(), vec![3, 3, 1, 1]);
    }

    #[test]
    fn test_chunk_grouping_short_table_is_error() {
        let runs = [ChunkRun {
            first_chunk: 1,
            samples_per_chunk: 1,
            sample_description_index: 1,
        }];
        assert!(matches!(chunk_sample_counts(&runs, 2, 5), Err(Error::Remux(_))));
    }

    #[test]
    fn test_chunk_grouping_empty_chunks() {
        let runs = [ChunkRun {
            first_chunk: 1,
            samples_per_chunk: 2,
            sample_description_index: 1,
        }];
        assert_eq!(chunk_sample_counts(&runs, 3, 2).unwrap(), vec![2, 0, 0]);
    }

    #[test]
    fn test_from_stbl() {
        let table = SampleTable::from_stbl(&stbl(true), 1500).unwrap();
        assert_eq!(table.sample_count(), 5);
        assert_eq!(table.durations, vec![10, 10, 10, 20, 20]);
        assert_eq!(table.composition_offsets, Some(vec![20, 0, 0, 0, 0]));
        assert_eq!(table.size(4), 500);

        let chunks = table.chunks().unwrap();
        assert_eq!(
            chunks.iter().map(|c| c.sample_count).collect::<Vec<_>>(),
            vec![2, 2, 1]
        );
        assert_eq!(chunks[2].first_sample, 4);
        assert_eq!(chunks[1].offset, 348);
    }

    #[test]
    fn test_missing_ctts_has_no_offsets() {
        let table = SampleTable::from_stbl(&stbl(false), 1500).unwrap();
        assert!(table.composition_offsets.is_none());
        assert_eq!(table.composition_offset(0), None);
    }

    #[test]
    fn test_uniform_sample_size() {
        let sizes = SampleSizes::Uniform { size: 64, count: 3 };
        assert_eq!(sizes.get(2), Some(64));
        assert_eq!(sizes.get(3), None);
    }

    #[test]
    fn test_missing_stsz() {
        let stbl = BoxList::from(vec![full_box(b"stts", &[0])]);
        assert!(matches!(SampleTable::from_stbl(&stbl, 0), Err(Error::MissingBox(_))));
    }

    #[test]
    fn test_sample_count_bounded_by_data() {
        let stbl = BoxList::from(vec![
            full_box(b"stts", &[1, 50_000_000, 1]),
            full_box(b"stsc", &[1, 1, 50_000_000, 1]),
            full_box(b"stsz", &[1, 50_000_000]),
            full_box(b"stco", &[1, 0]),
        ]);
        let err = SampleTable::from_stbl(&stbl, 64).unwrap_err();
        assert!(matches!(err, Error::Remux(_)), "{:?}", err);

        let stbl = BoxList::from(vec![
            full_box(b"stts", &[1, u32::MAX, 1]),
            full_box(b"stsc", &[1, 1, u32::MAX, 1]),
            full_box(b"stsz", &[1, u32::MAX]),
            full_box(b"stco", &[1, 0]),
        ]);
        assert!(matches!(SampleTable::from_stbl(&stbl, 1 << 20), Err(Error::Remux(_))));
    }

    #[test]
    fn test_samples_filling_data_exactly() {
        assert!(SampleTable::from_stbl(&stbl(false), 1499).is_err());
        assert_eq!(SampleTable::from_stbl(&stbl(false), 1500).unwrap().sample_count(), 5);
    }
}
