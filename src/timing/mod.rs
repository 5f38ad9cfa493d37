//! Wall-clock to looping VoD mapping.
//!
//! Live segment `n` covers `[(n - start_number) * d, (n - start_number + 1) * d)`
//! seconds after the availability start time, where `d` is the nominal
//! segment duration. The content loops every `wrap = d * nr_segments_in_loop`
//! seconds, so the VoD segment and presentation offset follow from a divmod
//! by the wrap duration.

use crate::config::Config;
use serde::Serialize;

/// Loop parameters of an analysed VoD asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LoopDescriptor {
    pub first_vod_segment_number: u32,
    pub nr_segments_in_loop: u32,
    pub segment_duration_s: u64,
}

impl LoopDescriptor {
    pub fn new(first_vod_segment_number: u32, nr_segments_in_loop: u32, segment_duration_s: u64) -> Self {
        Self {
            first_vod_segment_number,
            nr_segments_in_loop,
            segment_duration_s,
        }
    }

    pub fn wrap_duration_s(&self) -> u64 {
        self.segment_duration_s * self.nr_segments_in_loop as u64
    }
}

/// How long before its nominal end a segment may be requested.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum AvailabilityTimeOffset {
    Finite(f64),
    /// Every produced segment is available immediately.
    Infinite,
}

impl AvailabilityTimeOffset {
    pub fn from_seconds(seconds: f64) -> Self {
        if seconds.is_infinite() {
            Self::Infinite
        } else {
            Self::Finite(seconds)
        }
    }
}

impl Default for AvailabilityTimeOffset {
    fn default() -> Self {
        Self::Finite(0.0)
    }
}

/// VoD source of one live segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SegmentMapping {
    pub live_nr: u32,
    pub vod_nr: u32,
    pub loops_done: u64,
    /// Seconds to add to VoD presentation times.
    pub presentation_offset_s: u64,
    /// Start of the segment in seconds after the availability start time.
    pub segment_time_s: u64,
    /// The segment directly precedes the stop number.
    pub is_last: bool,
}

/// Availability of a live segment at a given wall-clock time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum Verdict {
    Available(SegmentMapping),
    /// The segment becomes available at `available_at`.
    NotYetAvailable { available_at: f64, wait_s: f64 },
    /// The segment left the time-shift window `age_s` seconds ago.
    ExpiredFromWindow { age_s: f64 },
    /// The segment is at or after the stop number.
    BeyondEnd,
}

/// Window of a live presentation at a wall-clock instant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AvailabilityWindow {
    pub availability_start_time: f64,
    pub availability_end_time: Option<f64>,
    pub media_presentation_duration: Option<f64>,
    pub time_shift_buffer_depth_s: u64,
    pub first_available: Option<u32>,
    pub last_available: Option<u32>,
}

/// Maps live segment numbers onto a looping VoD asset.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopTimeMapper {
    descriptor: LoopDescriptor,
    availability_start_time: f64,
    start_number: u32,
    time_shift_buffer_depth_s: u64,
    availability_time_offset: AvailabilityTimeOffset,
    stop_number: Option<u32>,
}

impl LoopTimeMapper {
    /// `availability_start_time` is in seconds since the epoch.
    pub fn new(descriptor: LoopDescriptor, availability_start_time: f64) -> Self {
        Self {
            descriptor,
            availability_start_time,
            start_number: 0,
            time_shift_buffer_depth_s: 300,
            availability_time_offset: AvailabilityTimeOffset::default(),
            stop_number: None,
        }
    }

    /// Mapper for the configured content and live parameters.
    pub fn from_config(config: &Config) -> Self {
        let content = &config.content;
        let live = &config.live;
        let descriptor = LoopDescriptor::new(
            content.first_segment_in_loop,
            content.nr_segments_in_loop,
            content.segment_duration_s,
        );
        Self::new(
            descriptor,
            live.availability_start_time.timestamp_millis() as f64 / 1000.0,
        )
        .start_number(live.start_number)
        .time_shift_buffer_depth(config.time_shift_buffer_depth_s())
        .availability_time_offset(AvailabilityTimeOffset::from_seconds(
            live.availability_time_offset,
        ))
        .stop_number(live.stop_number)
    }

    pub fn start_number(mut self, start_number: u32) -> Self {
        self.start_number = start_number;
        self
    }

    pub fn time_shift_buffer_depth(mut self, seconds: u64) -> Self {
        self.time_shift_buffer_depth_s = seconds;
        self
    }

    pub fn availability_time_offset(mut self, offset: AvailabilityTimeOffset) -> Self {
        self.availability_time_offset = offset;
        self
    }

    pub fn stop_number(mut self, stop_number: Option<u32>) -> Self {
        self.stop_number = stop_number;
        self
    }

    pub fn descriptor(&self) -> &LoopDescriptor {
        &self.descriptor
    }

    /// Seconds since the epoch.
    pub fn availability_start_time(&self) -> f64 {
        self.availability_start_time
    }

    fn segment_duration(&self) -> f64 {
        self.descriptor.segment_duration_s as f64
    }

    /// VoD segment and offset for `live_nr`, or `None` before the start number.
    pub fn map_segment(&self, live_nr: u32) -> Option<SegmentMapping> {
        let index = live_nr.checked_sub(self.start_number)? as u64;
        let duration = self.descriptor.segment_duration_s;
        let wrap = self.descriptor.wrap_duration_s();
        if wrap == 0 {
            return None;
        }

        let segment_time_s = index * duration;
        let (loops_done, time_in_loop) = (segment_time_s / wrap, segment_time_s % wrap);
        let vod_nr = self.descriptor.first_vod_segment_number + (time_in_loop / duration) as u32;

        Some(SegmentMapping {
            live_nr,
            vod_nr,
            loops_done,
            presentation_offset_s: loops_done * wrap,
            segment_time_s,
            is_last: self.stop_number == live_nr.checked_add(1),
        })
    }

    /// Instant the segment may first be requested, `None` when always available.
    pub fn available_at(&self, live_nr: u32) -> Option<f64> {
        let end = self.segment_end(live_nr);
        match self.availability_time_offset {
            AvailabilityTimeOffset::Finite(offset) => Some(end - offset),
            AvailabilityTimeOffset::Infinite => None,
        }
    }

    /// Nominal end of the segment in seconds since the epoch.
    fn segment_end(&self, live_nr: u32) -> f64 {
        let index = live_nr as f64 - self.start_number as f64;
        self.availability_start_time + (index + 1.0) * self.segment_duration()
    }

    /// Decide whether `live_nr` can be served at wall-clock `now`.
    pub fn availability(&self, now: f64, live_nr: u32) -> Verdict {
        let Some(mapping) = self.map_segment(live_nr) else {
            return Verdict::ExpiredFromWindow {
                age_s: now - self.segment_end(live_nr),
            };
        };
        if self.stop_number.is_some_and(|stop| live_nr >= stop) {
            return Verdict::BeyondEnd;
        }
        if let Some(available_at) = self.available_at(live_nr) {
            if now < available_at {
                return Verdict::NotYetAvailable {
                    available_at,
                    wait_s: available_at - now,
                };
            }
        }
        if self.stop_number.is_none() {
            let expires_at = self.segment_end(live_nr) + self.time_shift_buffer_depth_s as f64;
            if now > expires_at {
                return Verdict::ExpiredFromWindow {
                    age_s: now - expires_at,
                };
            }
        }
        Verdict::Available(mapping)
    }

    /// Newest segment available at `now`, ignoring the stop number.
    fn newest_at(&self, now: f64) -> Option<u32> {
        let elapsed = now - self.availability_start_time;
        let completed = match self.availability_time_offset {
            AvailabilityTimeOffset::Finite(offset) => ((elapsed + offset) / self.segment_duration()).floor() - 1.0,
            // The segment under production is the newest one.
            AvailabilityTimeOffset::Infinite => (elapsed / self.segment_duration()).floor(),
        };
        if completed < 0.0 {
            return None;
        }
        u32::try_from(self.start_number as u64 + completed as u64).ok()
    }

    pub fn availability_window(&self, now: f64) -> AvailabilityWindow {
        let duration = self.segment_duration();
        let media_presentation_duration = self
            .stop_number
            .map(|stop| stop.saturating_sub(self.start_number) as f64 * duration);

        let mut last_available = self.newest_at(now);
        if let (Some(last), Some(stop)) = (last_available, self.stop_number) {
            last_available = Some(last.min(stop.saturating_sub(1)));
        }

        let first_available = last_available.map(|last| {
            let first = match self.stop_number {
                Some(_) => self.start_number,
                None => {
                    let oldest = (now - self.availability_start_time - self.time_shift_buffer_depth_s as f64)
                        / duration
                        - 1.0;
                    let skipped = oldest.ceil().max(0.0) as u64;
                    u32::try_from(self.start_number as u64 + skipped).unwrap_or(u32::MAX)
                }
            };
            first.min(last)
        });

        AvailabilityWindow {
            availability_start_time: self.availability_start_time,
            availability_end_time: media_presentation_duration.map(|d| self.availability_start_time + d),
            media_presentation_duration,
            time_shift_buffer_depth_s: self.time_shift_buffer_depth_s,
            first_available,
            last_available,
        }
    }
}
