//! Shared fixture for integration tests.
//!
//! [`TestContent`] writes a synthetic looping VoD asset into a temporary
//! directory: a video representation `V300` (track 1, 90 kHz) and an audio
//! representation `A48` (track 2, 48 kHz), each with four 6-second segments.
//! The time-shift buffer is one hour.

#![allow(dead_code)]

use bytes::Bytes;
use livesim::config::{Config, ContentConfig, LiveConfig, MediaConfig, MediaKind};
use livesim::streaming::LiveSource;
use livesim_media::fmp4::write_styp;
use livesim_media::{HandlerType, InitSegmentBuilder, MoofBuilder, Sample};
use std::path::PathBuf;
use tempfile::TempDir;

pub const SEGMENT_DURATION_S: u64 = 6;
pub const SEGMENTS_IN_LOOP: u32 = 4;
pub const VIDEO: &str = "V300";
pub const AUDIO: &str = "A48";
pub const VIDEO_TIMESCALE: u32 = 90_000;
pub const AUDIO_TIMESCALE: u32 = 48_000;

/// Samples per segment; two samples of three seconds each.
pub const SAMPLES_PER_SEGMENT: u32 = 2;

pub struct TestContent {
    pub dir: TempDir,
    pub config: Config,
}

impl TestContent {
    /// Create the asset with both representations.
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let content = Self {
            config: config_for(dir.path().to_path_buf()),
            dir,
        };
        content.write_representation(VIDEO, 1, VIDEO_TIMESCALE, HandlerType::Video);
        content.write_representation(AUDIO, 2, AUDIO_TIMESCALE, HandlerType::Audio);
        content
    }

    pub fn base_path(&self) -> PathBuf {
        self.dir.path().to_path_buf()
    }

    pub fn segment_path(&self, representation: &str, number: u32) -> PathBuf {
        self.base_path()
            .join(representation)
            .join(format!("{number}.m4s"))
    }

    /// Write `init.mp4` and one loop of segments for a representation.
    pub fn write_representation(
        &self,
        name: &str,
        track_id: u32,
        timescale: u32,
        handler: HandlerType,
    ) {
        let dir = self.base_path().join(name);
        std::fs::create_dir_all(&dir).expect("failed to create representation dir");

        let mut init = InitSegmentBuilder::new()
            .track_id(track_id)
            .timescale(timescale)
            .handler(handler)
            .duration(SEGMENT_DURATION_S * SEGMENTS_IN_LOOP as u64 * timescale as u64);
        if handler.is_audio() {
            init = init.audio(2, timescale);
        }
        std::fs::write(dir.join("init.mp4"), init.build()).expect("failed to write init");

        let segment_ticks = SEGMENT_DURATION_S * timescale as u64;
        for number in 0..SEGMENTS_IN_LOOP {
            let data = media_segment(track_id, number, number as u64 * segment_ticks, segment_ticks);
            std::fs::write(dir.join(format!("{number}.m4s")), data)
                .expect("failed to write segment");
        }
    }

    /// Build a live source over the asset.
    pub fn source(&self) -> LiveSource {
        LiveSource::from_config(&self.config).expect("failed to load live source")
    }
}

/// One VoD media segment with [`SAMPLES_PER_SEGMENT`] equal samples.
pub fn media_segment(track_id: u32, number: u32, decode_time: u64, duration: u64) -> Vec<u8> {
    let sample_duration = (duration / SAMPLES_PER_SEGMENT as u64) as u32;
    let samples: Vec<Sample> = (0..SAMPLES_PER_SEGMENT)
        .map(|i| Sample {
            duration: sample_duration,
            size: 16,
            is_sync: i == 0,
            cto: 0,
            data: Bytes::from(vec![(number * 16 + i) as u8; 16]),
        })
        .collect();
    [
        write_styp(*b"msdh", &[*b"msdh", *b"msix"]),
        MoofBuilder::new(number + 1, track_id)
            .base_media_decode_time(decode_time)
            .build(&samples),
    ]
    .concat()
}

fn config_for(base_path: PathBuf) -> Config {
    Config {
        content: ContentConfig {
            base_path,
            first_segment_in_loop: 0,
            nr_segments_in_loop: SEGMENTS_IN_LOOP,
            segment_duration_s: SEGMENT_DURATION_S,
            default_tsbd_secs: 3600,
        },
        media: vec![
            MediaConfig {
                kind: MediaKind::Video,
                timescale: VIDEO_TIMESCALE,
                representations: vec![VIDEO.to_string()],
            },
            MediaConfig {
                kind: MediaKind::Audio,
                timescale: AUDIO_TIMESCALE,
                representations: vec![AUDIO.to_string()],
            },
        ],
        live: LiveConfig::default(),
    }
}
