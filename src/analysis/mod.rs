//! Offline analysis of a looping VoD asset.
//!
//! For each representation the analyzer checks the init segment, walks the
//! segments of one loop in order and records their durations as a
//! [`SegmentTimelineIndex`], which is written next to the representation
//! directory as `<rep>.dat`.

use crate::config::ContentConfig;
use crate::error::{LiveError, Result};
use crate::timing::LoopDescriptor;
use livesim_media::{inspect_init, segment_timing, SegmentTimelineIndex, TrackInfo};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Analysis result for one representation.
#[derive(Debug, Clone, PartialEq)]
pub struct RepresentationAnalysis {
    pub name: String,
    pub track: TrackInfo,
    pub timeline: SegmentTimelineIndex,
}

/// Produces loop descriptors and segment timelines from content on disk.
#[derive(Debug, Clone)]
pub struct ContentAnalyzer {
    base_path: PathBuf,
    first_segment_in_loop: u32,
    nr_segments_in_loop: u32,
    segment_duration_s: u64,
}

impl ContentAnalyzer {
    pub fn new(config: &ContentConfig) -> Self {
        Self {
            base_path: config.base_path.clone(),
            first_segment_in_loop: config.first_segment_in_loop,
            nr_segments_in_loop: config.nr_segments_in_loop,
            segment_duration_s: config.segment_duration_s,
        }
    }

    pub fn descriptor(&self) -> LoopDescriptor {
        LoopDescriptor::new(
            self.first_segment_in_loop,
            self.nr_segments_in_loop,
            self.segment_duration_s,
        )
    }

    pub fn representation_dir(&self, representation: &str) -> PathBuf {
        self.base_path.join(representation)
    }

    pub fn init_path(&self, representation: &str) -> PathBuf {
        self.representation_dir(representation).join("init.mp4")
    }

    pub fn segment_path(&self, representation: &str, number: u32) -> PathBuf {
        self.representation_dir(representation)
            .join(format!("{number}.m4s"))
    }

    pub fn index_path(&self, representation: &str) -> PathBuf {
        self.base_path.join(format!("{representation}.dat"))
    }

    /// Inspect the init segment and check its timescale.
    pub fn inspect(&self, representation: &str, timescale: u32) -> Result<TrackInfo> {
        let track = inspect_init(&read(&self.init_path(representation))?)?;
        if track.timescale != timescale {
            return Err(LiveError::consistency(format!(
                "{representation}: timescale {} does not match configured {timescale}",
                track.timescale
            )));
        }
        Ok(track)
    }

    /// Scan one loop of `representation` and build its timeline.
    pub fn analyze(&self, representation: &str, timescale: u32) -> Result<RepresentationAnalysis> {
        let track = self.inspect(representation, timescale)?;

        let mut start_time = None;
        let mut next_time = None;
        let mut durations = Vec::with_capacity(self.nr_segments_in_loop as usize);
        let last = self.first_segment_in_loop + self.nr_segments_in_loop;
        for number in self.first_segment_in_loop..last {
            let path = self.segment_path(representation, number);
            if !path.exists() {
                return Err(LiveError::consistency(format!(
                    "{representation}: segment {number} missing, numbering has a gap"
                )));
            }
            let (decode_time, duration) = segment_timing(&read(&path)?)?;
            let duration = u32::try_from(duration).ok().filter(|&d| d > 0).ok_or_else(|| {
                LiveError::consistency(format!(
                    "{representation}: segment {number} has unusable duration {duration}"
                ))
            })?;

            match next_time {
                Some(expected) if decode_time != expected => {
                    return Err(LiveError::consistency(format!(
                        "{representation}: segment {number} starts at {decode_time}, expected {expected}"
                    )));
                }
                Some(_) => {}
                None => {
                    start_time = Some(u32::try_from(decode_time).map_err(|_| {
                        LiveError::consistency(format!(
                            "{representation}: first decode time {decode_time} exceeds 32 bits"
                        ))
                    })?);
                }
            }
            next_time = Some(decode_time + duration as u64);
            durations.push(duration);
            debug!(representation, number, decode_time, duration, "Analyzed segment");
        }

        let timeline = SegmentTimelineIndex::from_durations(
            self.first_segment_in_loop,
            start_time.unwrap_or(0),
            &durations,
        )?;
        let nominal = self.descriptor().wrap_duration_s() * timescale as u64;
        if timeline.wrap_duration() != nominal {
            warn!(
                representation,
                measured = timeline.wrap_duration(),
                nominal,
                "Loop duration differs from nominal segment duration"
            );
        }

        info!(
            representation,
            track_id = track.track_id,
            timescale,
            runs = timeline.runs().len(),
            "Analyzed representation"
        );
        Ok(RepresentationAnalysis {
            name: representation.to_string(),
            track,
            timeline,
        })
    }

    /// Analyze and persist the timeline as `<rep>.dat`.
    pub fn analyze_and_write(&self, representation: &str, timescale: u32) -> Result<RepresentationAnalysis> {
        let analysis = self.analyze(representation, timescale)?;
        let path = self.index_path(representation);
        analysis.timeline.write(&path)?;
        info!(path = %path.display(), "Wrote segment timeline");
        Ok(analysis)
    }

    /// Load a persisted timeline, analyzing the content when none exists.
    pub fn load(&self, representation: &str, timescale: u32) -> Result<RepresentationAnalysis> {
        let path = self.index_path(representation);
        if !path.exists() {
            debug!(representation, "No segment timeline on disk, analyzing");
            return self.analyze(representation, timescale);
        }
        Ok(RepresentationAnalysis {
            name: representation.to_string(),
            track: self.inspect(representation, timescale)?,
            timeline: SegmentTimelineIndex::read(&path)?,
        })
    }
}

fn read(path: &Path) -> Result<Vec<u8>> {
    Ok(std::fs::read(path)?)
}
