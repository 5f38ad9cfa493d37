//! Run-length encoded segment timeline of a looping VoD representation.
//!
//! The index is persisted as consecutive 16-byte big-endian records
//! `(start_nr, repeat_count, start_time, duration)`. A run covers
//! `repeat_count + 1` segments of equal duration, following the DASH `@r`
//! convention. Query times are live ticks; they are folded into one loop
//! of the VoD content before lookup.

mod builder;

pub use builder::SegmentTimelineBuilder;

use crate::structops;
use crate::{Error, Result};
use bytes::{BufMut, BytesMut};
use std::path::Path;
use tracing::debug;

/// Size of one persisted run record.
pub const RECORD_SIZE: usize = 16;

/// A span of consecutive segments with equal duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct SegTimeRun {
    pub start_nr: u32,
    /// Segments in the run minus one.
    pub repeat_count: u32,
    pub start_time: u32,
    pub duration: u32,
}

impl SegTimeRun {
    pub fn segment_count(&self) -> u64 {
        self.repeat_count as u64 + 1
    }

    /// Segment number following the run, `None` past `u32::MAX`.
    pub fn end_nr(&self) -> Option<u32> {
        self.start_nr.checked_add(self.repeat_count)?.checked_add(1)
    }

    /// Decode time following the run.
    pub fn end_time(&self) -> u64 {
        self.start_time as u64 + self.segment_count() * self.duration as u64
    }
}

/// A segment located in the timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentPosition {
    /// VoD segment number.
    pub vod_nr: u32,
    /// Completed loops before this segment.
    pub loop_index: u64,
    /// Start of the segment in live ticks.
    pub start: u64,
    pub duration: u32,
    pub run_index: usize,
    /// Index of the segment within its run.
    pub repeat_index: u32,
}

/// One `S` element of a DASH SegmentTimeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct TimelineEntry {
    /// Explicit start (`@t`), only set on the first entry.
    pub start: Option<u64>,
    pub duration: u32,
    /// Additional repetitions (`@r`).
    pub repeat: u32,
}

/// Ordered, contiguous segment runs of one representation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SegmentTimelineIndex {
    runs: Vec<SegTimeRun>,
    start_time: u64,
}

impl SegmentTimelineIndex {
    /// Create an index from contiguous runs.
    pub fn from_runs(runs: Vec<SegTimeRun>) -> Result<Self> {
        for (i, run) in runs.iter().enumerate() {
            if run.duration == 0 {
                return Err(Error::consistency(format!("run {i} has zero duration")));
            }
            if run.end_nr().is_none() {
                return Err(Error::consistency(format!(
                    "run {i} of {} segments from {} exceeds 32-bit segment numbers",
                    run.segment_count(),
                    run.start_nr
                )));
            }
        }
        for (i, pair) in runs.windows(2).enumerate() {
            let (prev, next) = (pair[0], pair[1]);
            if Some(next.start_nr) != prev.end_nr() {
                return Err(Error::consistency(format!(
                    "run {} starts at segment {}, expected {}",
                    i + 1,
                    next.start_nr,
                    prev.start_nr as u64 + prev.segment_count()
                )));
            }
            if next.start_time as u64 != prev.end_time() {
                return Err(Error::consistency(format!(
                    "run {} starts at time {}, expected {}",
                    i + 1,
                    next.start_time,
                    prev.end_time()
                )));
            }
        }
        let start_time = runs.first().map_or(0, |r| r.start_time as u64);
        Ok(Self { runs, start_time })
    }

    pub(crate) fn from_runs_unchecked(runs: Vec<SegTimeRun>, start_time: u32) -> Self {
        let start_time = runs.first().map_or(start_time, |r| r.start_time) as u64;
        Self { runs, start_time }
    }

    /// Run-length encode consecutive segment durations.
    pub fn from_durations(start_nr: u32, start_time: u32, durations: &[u32]) -> Result<Self> {
        let mut builder = SegmentTimelineBuilder::new(start_nr, start_time);
        builder.extend(durations.iter().copied())?;
        Ok(builder.build())
    }

    /// Decode persisted records.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() % RECORD_SIZE != 0 {
            return Err(Error::format(
                "segment timeline",
                (data.len() - data.len() % RECORD_SIZE) as u64,
                format!("length {} is not a multiple of {RECORD_SIZE}", data.len()),
            ));
        }
        let runs = data
            .chunks_exact(RECORD_SIZE)
            .map(|record| SegTimeRun {
                start_nr: structops::get_u32(record, 0),
                repeat_count: structops::get_u32(record, 4),
                start_time: structops::get_u32(record, 8),
                duration: structops::get_u32(record, 12),
            })
            .collect();
        Self::from_runs(runs)
    }

    /// Encode as persisted records.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(self.runs.len() * RECORD_SIZE);
        for run in &self.runs {
            buf.put_u32(run.start_nr);
            buf.put_u32(run.repeat_count);
            buf.put_u32(run.start_time);
            buf.put_u32(run.duration);
        }
        buf.to_vec()
    }

    /// Load an index file.
    pub fn read(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let index = Self::from_bytes(&std::fs::read(path)?)?;
        debug!(path = %path.display(), runs = index.runs.len(), "Loaded segment timeline");
        Ok(index)
    }

    /// Write an index file.
    pub fn write(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, self.to_bytes())?;
        Ok(())
    }

    pub fn runs(&self) -> &[SegTimeRun] {
        &self.runs
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    /// Decode time of the first segment.
    pub fn start_time(&self) -> u64 {
        self.start_time
    }

    /// Number of segments in one loop.
    pub fn segment_count(&self) -> u64 {
        self.runs.iter().map(SegTimeRun::segment_count).sum()
    }

    /// Duration of one loop in ticks.
    pub fn wrap_duration(&self) -> u64 {
        self.runs
            .iter()
            .map(|r| r.segment_count() * r.duration as u64)
            .sum()
    }

    fn position(&self, loop_index: u64, run_index: usize, repeat_index: u32) -> SegmentPosition {
        let run = self.runs[run_index];
        SegmentPosition {
            vod_nr: run.start_nr + repeat_index,
            loop_index,
            start: self.start_time
                + loop_index * self.wrap_duration()
                + (run.start_time as u64 - self.start_time)
                + repeat_index as u64 * run.duration as u64,
            duration: run.duration,
            run_index,
            repeat_index,
        }
    }

    /// Segment following `pos`, wrapping into the next loop.
    fn next_position(&self, pos: &SegmentPosition) -> SegmentPosition {
        let run = self.runs[pos.run_index];
        if pos.repeat_index < run.repeat_count {
            self.position(pos.loop_index, pos.run_index, pos.repeat_index + 1)
        } else if pos.run_index + 1 < self.runs.len() {
            self.position(pos.loop_index, pos.run_index + 1, 0)
        } else {
            self.position(pos.loop_index + 1, 0, 0)
        }
    }

    /// Latest segment starting at or before live tick `t`.
    ///
    /// Returns `None` for an empty index or a time before the first segment.
    pub fn latest_at_or_before(&self, t: u64) -> Option<SegmentPosition> {
        let wrap = self.wrap_duration();
        if wrap == 0 || t < self.start_time {
            return None;
        }
        let relative = t - self.start_time;
        let (loop_index, folded) = (relative / wrap, self.start_time + relative % wrap);

        let run_index = self
            .runs
            .partition_point(|r| r.start_time as u64 <= folded)
            .checked_sub(1)?;
        let run = self.runs[run_index];
        let repeat_index = ((folded - run.start_time as u64) / run.duration as u64)
            .min(run.repeat_count as u64) as u32;

        Some(self.position(loop_index, run_index, repeat_index))
    }

    /// Segment whose start is closest to live tick `t`.
    ///
    /// A time past the middle of a segment resolves to the next one, which may
    /// be in the next run or the next loop.
    pub fn closest_start(&self, t: u64) -> Option<SegmentPosition> {
        let pos = self.latest_at_or_before(t)?;
        if (t - pos.start) * 2 > pos.duration as u64 {
            Some(self.next_position(&pos))
        } else {
            Some(pos)
        }
    }

    /// Timeline entries covering the live tick window `[start, end)`.
    ///
    /// Walks back from the run holding the last segment to the run holding
    /// the first, one entry per run. The first entry carries an explicit
    /// start time.
    pub fn timeline(&self, start: u64, end: u64) -> Vec<TimelineEntry> {
        if end <= start {
            return Vec::new();
        }
        let (Some(first), Some(last)) = (
            self.latest_at_or_before(start),
            self.latest_at_or_before(end - 1),
        ) else {
            return Vec::new();
        };

        let first_key = (first.loop_index, first.run_index);
        let last_key = (last.loop_index, last.run_index);
        if first_key > last_key {
            return Vec::new();
        }

        let mut entries = Vec::new();
        let mut key = last_key;
        loop {
            let run = self.runs[key.1];
            let from = if key == first_key { first.repeat_index } else { 0 };
            let to = if key == last_key { last.repeat_index } else { run.repeat_count };
            entries.push(TimelineEntry {
                start: None,
                duration: run.duration,
                repeat: to - from,
            });
            if key == first_key {
                break;
            }
            key = match key.1 {
                0 => (key.0 - 1, self.runs.len() - 1),
                run_index => (key.0, run_index - 1),
            };
        }

        entries.reverse();
        entries[0].start = Some(first.start);
        entries
    }
}
