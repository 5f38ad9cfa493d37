//! Low-latency chunking of a rewritten segment.
//!
//! A segment with one `moof`/`mdat` pair is re-emitted as a sequence of
//! smaller fragments, each carrying `samples_per_chunk` samples. Chunks are
//! built on demand as the iterator is advanced.

use crate::boxes::{default_containers, BoxTree, BoxType};
use crate::fmp4::{MoofBuilder, Sample, TrackFragmentHeader, TrackRun};
use crate::structops;
use crate::{Error, Result};
use bytes::Bytes;
use tracing::trace;

/// One low-latency chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    /// Leading boxes (first chunk only) followed by `moof` + `mdat`.
    pub data: Bytes,
    /// Wall-clock instant (seconds since epoch) at which the chunk is complete.
    pub available_at: f64,
}

/// Lazily splits a segment into chunks.
#[derive(Debug)]
pub struct Chunker {
    leading: Option<Vec<u8>>,
    samples: Vec<Sample>,
    sequence_number: u32,
    track_id: u32,
    decode_time: u64,
    timescale: u32,
    samples_per_chunk: usize,
    segment_start: f64,
    next: usize,
    elapsed: u64,
}

impl Chunker {
    /// Prepare chunking of `segment`.
    ///
    /// `segment_start` is the wall-clock time of the segment's first sample
    /// and `timescale` the track timescale. A `samples_per_chunk` of zero is
    /// treated as one.
    pub fn new(segment: Bytes, samples_per_chunk: usize, segment_start: f64, timescale: u32) -> Result<Self> {
        let tree = BoxTree::parse(&segment, &default_containers())?;

        let mut leading = Vec::new();
        for &id in tree.roots() {
            match tree.box_type(id) {
                BoxType::MOOF => break,
                BoxType::SIDX => continue,
                _ => leading.extend_from_slice(&tree.node_bytes(id)?),
            }
        }

        let moof = tree.find_root(BoxType::MOOF).ok_or(Error::MissingBox("moof"))?;
        let mdat = tree.find_root(BoxType::MDAT).ok_or(Error::MissingBox("mdat"))?;
        let mfhd = tree.find_child(moof, BoxType::MFHD).ok_or(Error::MissingBox("mfhd"))?;
        let sequence_number = structops::get_u32(tree.checked_data(mfhd, 16)?, 12);

        let traf = tree.find_child(moof, BoxType::TRAF).ok_or(Error::MissingBox("traf"))?;
        let tfhd_id = tree.find_child(traf, BoxType::TFHD).ok_or(Error::MissingBox("tfhd"))?;
        let tfhd = TrackFragmentHeader::parse(tree.checked_data(tfhd_id, 16)?).ok_or_else(|| {
            Error::format(tree.path(tfhd_id), tree.offset(tfhd_id), "truncated track fragment header")
        })?;
        if tfhd.has_base_data_offset() {
            return Err(Error::unsupported(
                tree.path(tfhd_id),
                tree.offset(tfhd_id),
                "chunking needs moof-relative data offsets",
            ));
        }

        let decode_time = match tree.find_child(traf, BoxType::TFDT) {
            Some(tfdt) => {
                let bytes = tree.checked_data(tfdt, 16)?;
                if bytes[8] == 1 {
                    structops::get_u64(tree.checked_data(tfdt, 20)?, 12)
                } else {
                    structops::get_u32(bytes, 12) as u64
                }
            }
            None => 0,
        };

        let moof_start = tree.offset(moof) as usize;
        let mut next_run = tree.offset(mdat) as usize + 8;
        let mut samples = Vec::new();
        for trun_id in tree.find_children(traf, BoxType::TRUN) {
            let trun = TrackRun::parse(tree.checked_data(trun_id, 16)?).ok_or_else(|| {
                Error::format(tree.path(trun_id), tree.offset(trun_id), "truncated track run")
            })?;
            let start = match trun.data_offset {
                Some(offset) => (moof_start as i64 + offset as i64).max(0) as usize,
                None => next_run,
            };
            let size = trun.total_size(&tfhd).unwrap_or(0) as usize;
            let end = start.saturating_add(size).min(segment.len());
            let run_samples = trun.samples(&tfhd, &segment.slice(start.min(end)..end)).ok_or_else(|| {
                Error::unsupported(
                    tree.path(trun_id),
                    tree.offset(trun_id),
                    "sample durations or sizes unknown, or run exceeds the segment",
                )
            })?;
            samples.extend(run_samples);
            next_run = end;
        }

        Ok(Self {
            leading: (!leading.is_empty()).then_some(leading),
            samples,
            sequence_number,
            track_id: tfhd.track_id,
            decode_time,
            timescale,
            samples_per_chunk: samples_per_chunk.max(1),
            segment_start,
            next: 0,
            elapsed: 0,
        })
    }

    /// Number of chunks the segment splits into.
    pub fn chunk_count(&self) -> usize {
        self.samples.len().div_ceil(self.samples_per_chunk)
    }
}

impl Iterator for Chunker {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        if self.next >= self.samples.len() {
            return None;
        }
        let end = (self.next + self.samples_per_chunk).min(self.samples.len());
        let samples = &self.samples[self.next..end];
        let duration: u64 = samples.iter().map(|s| s.duration as u64).sum();

        let fragment = MoofBuilder::new(self.sequence_number, self.track_id)
            .base_media_decode_time(self.decode_time + self.elapsed)
            .build(samples);
        let data = match self.leading.take() {
            Some(mut leading) => {
                leading.extend_from_slice(&fragment);
                leading
            }
            None => fragment,
        };

        self.next = end;
        self.elapsed += duration;
        let available_at = self.segment_start + self.elapsed as f64 / self.timescale.max(1) as f64;
        trace!(chunk_end = end, available_at, "Built chunk");

        Some(Chunk {
            data: Bytes::from(data),
            available_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fmp4::write_styp;

    fn segment() -> Bytes {
        let samples: Vec<Sample> = (0..5u8)
            .map(|i| Sample {
                duration: 18_000,
                size: 2,
                is_sync: i == 0,
                cto: 0,
                data: Bytes::from(vec![i, i]),
            })
            .collect();
        Bytes::from(
            [
                write_styp(*b"msdh", &[*b"msdh"]),
                MoofBuilder::new(11, 1)
                    .base_media_decode_time(900_000)
                    .build(&samples),
            ]
            .concat(),
        )
    }

    #[test]
    fn test_chunks_split_samples() {
        let chunker = Chunker::new(segment(), 2, 100.0, 90_000).unwrap();
        assert_eq!(chunker.chunk_count(), 3);

        let chunks: Vec<Chunk> = chunker.collect();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].available_at, 100.4);
        assert_eq!(chunks[2].available_at, 101.0);

        let first = BoxTree::parse(&chunks[0].data, &default_containers()).unwrap();
        assert_eq!(first.box_type(first.roots()[0]), BoxType::STYP);
        let second = BoxTree::parse(&chunks[1].data, &default_containers()).unwrap();
        assert_eq!(second.box_type(second.roots()[0]), BoxType::MOOF);
    }

    #[test]
    fn test_chunk_decode_times_advance() {
        let chunks: Vec<Chunk> = Chunker::new(segment(), 2, 0.0, 90_000).unwrap().collect();
        let times: Vec<u64> = chunks
            .iter()
            .map(|c| {
                let tree = BoxTree::parse(&c.data, &default_containers()).unwrap();
                let tfdt = tree
                    .find_path(&[BoxType::MOOF, BoxType::TRAF, BoxType::TFDT])
                    .unwrap();
                structops::get_u32(tree.data(tfdt).unwrap(), 12) as u64
            })
            .collect();
        assert_eq!(times, vec![900_000, 936_000, 972_000]);
    }

    #[test]
    fn test_chunk_payloads_follow_source() {
        let chunks: Vec<Chunk> = Chunker::new(segment(), 4, 0.0, 90_000).unwrap().collect();
        let last = &chunks[1].data;
        let tree = BoxTree::parse(last, &default_containers()).unwrap();
        let mdat = tree.find_root(BoxType::MDAT).unwrap();
        assert_eq!(&tree.data(mdat).unwrap()[8..], &[4, 4]);
        let mfhd = tree.find_path(&[BoxType::MOOF, BoxType::MFHD]).unwrap();
        assert_eq!(structops::get_u32(tree.data(mfhd).unwrap(), 12), 11);
    }

    #[test]
    fn test_chunks_are_built_on_demand() {
        let mut chunker = Chunker::new(segment(), 1, 0.0, 90_000).unwrap();
        assert!(chunker.next().is_some());
        assert_eq!(chunker.next, 1);
        drop(chunker);
    }
}
