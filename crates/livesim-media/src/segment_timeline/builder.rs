//! Run-length encoding of segment durations.

use super::{SegTimeRun, SegmentTimelineIndex};
use crate::{Error, Result};

/// Builds a [`SegmentTimelineIndex`] from consecutive segment durations.
#[derive(Debug)]
pub struct SegmentTimelineBuilder {
    start_nr: u32,
    start_time: u32,
    runs: Vec<SegTimeRun>,
    next_time: u64,
}

impl SegmentTimelineBuilder {
    /// Start at segment `start_nr` with decode time `start_time`.
    pub fn new(start_nr: u32, start_time: u32) -> Self {
        Self {
            start_nr,
            start_time,
            runs: Vec::new(),
            next_time: start_time as u64,
        }
    }

    /// Append the next segment's duration.
    ///
    /// Fails when a new run would start past the 32-bit record fields.
    pub fn push(&mut self, duration: u32) -> Result<&mut Self> {
        let number = match self.runs.last() {
            Some(run) => run.end_nr(),
            None => Some(self.start_nr),
        }
        .filter(|nr| nr.checked_add(1).is_some())
        .ok_or_else(|| Error::consistency("segment numbers exceed 32 bits"))?;

        let extends_run = self.runs.last().is_some_and(|run| run.duration == duration);
        if extends_run {
            let last = self.runs.len() - 1;
            self.runs[last].repeat_count += 1;
        } else {
            let start_time = u32::try_from(self.next_time).map_err(|_| {
                Error::consistency(format!(
                    "segment {number} starts at {}, beyond 32-bit timeline records",
                    self.next_time
                ))
            })?;
            self.runs.push(SegTimeRun {
                start_nr: number,
                repeat_count: 0,
                start_time,
                duration,
            });
        }
        self.next_time += duration as u64;
        Ok(self)
    }

    /// Append several durations in order.
    pub fn extend(&mut self, durations: impl IntoIterator<Item = u32>) -> Result<&mut Self> {
        for duration in durations {
            self.push(duration)?;
        }
        Ok(self)
    }

    /// Decode time following the last pushed segment.
    pub fn end_time(&self) -> u64 {
        self.next_time
    }

    pub fn build(&self) -> SegmentTimelineIndex {
        SegmentTimelineIndex::from_runs_unchecked(self.runs.clone(), self.start_time)
    }
}
