use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub content: ContentConfig,

    #[serde(default)]
    pub media: Vec<MediaConfig>,

    #[serde(default)]
    pub live: LiveConfig,
}

impl Config {
    /// Media entry holding `representation`.
    pub fn media_for(&self, representation: &str) -> Option<&MediaConfig> {
        self.media
            .iter()
            .find(|m| m.representations.iter().any(|r| r == representation))
    }

    /// Time-shift buffer depth, falling back to the content default.
    pub fn time_shift_buffer_depth_s(&self) -> u64 {
        self.live
            .time_shift_buffer_depth_s
            .unwrap_or(self.content.default_tsbd_secs)
    }
}

/// Looping VoD asset on disk.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ContentConfig {
    /// Directory holding one subdirectory and one `.dat` file per representation.
    #[serde(default = "default_base_path")]
    pub base_path: PathBuf,

    #[serde(default)]
    pub first_segment_in_loop: u32,

    #[serde(default = "default_nr_segments_in_loop")]
    pub nr_segments_in_loop: u32,

    /// Nominal segment duration in whole seconds.
    #[serde(default = "default_segment_duration")]
    pub segment_duration_s: u64,

    #[serde(default = "default_tsbd")]
    pub default_tsbd_secs: u64,
}

fn default_base_path() -> PathBuf {
    PathBuf::from("content")
}
fn default_nr_segments_in_loop() -> u32 {
    350
}
fn default_segment_duration() -> u64 {
    6
}
fn default_tsbd() -> u64 {
    300
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            base_path: default_base_path(),
            first_segment_in_loop: 0,
            nr_segments_in_loop: default_nr_segments_in_loop(),
            segment_duration_s: default_segment_duration(),
            default_tsbd_secs: default_tsbd(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Audio,
    Subtitles,
}

/// Representations sharing one media type and timescale.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MediaConfig {
    pub kind: MediaKind,

    /// Track timescale every representation must use.
    pub timescale: u32,

    #[serde(default)]
    pub representations: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LiveConfig {
    #[serde(default = "default_availability_start_time")]
    pub availability_start_time: DateTime<Utc>,

    #[serde(default)]
    pub start_number: u32,

    /// Seconds a segment is available early; `inf` makes every segment available.
    #[serde(default)]
    pub availability_time_offset: f64,

    /// Defaults to `content.default_tsbd_secs`.
    #[serde(default)]
    pub time_shift_buffer_depth_s: Option<u64>,

    /// First live segment number that is no longer produced.
    #[serde(default)]
    pub stop_number: Option<u32>,

    #[serde(default)]
    pub keep_sidx: bool,

    /// SCTE-35 splices per minute (0 disables)
    #[serde(default)]
    pub splices_per_minute: u32,
}

fn default_availability_start_time() -> DateTime<Utc> {
    DateTime::default()
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            availability_start_time: default_availability_start_time(),
            start_number: 0,
            availability_time_offset: 0.0,
            time_shift_buffer_depth_s: None,
            stop_number: None,
            keep_sidx: false,
            splices_per_minute: 0,
        }
    }
}
