//! Integration tests for configuration loading.

use livesim::config::{load_config, load_config_or_default, MediaKind};
use livesim::timing::{LoopTimeMapper, Verdict};
use std::path::PathBuf;
use tempfile::TempDir;

fn write_config(dir: &TempDir, content: &str) -> PathBuf {
    let path = dir.path().join("livesim.toml");
    std::fs::write(&path, content).unwrap();
    path
}

const FULL: &str = r#"
[content]
base_path = "content/testpic"
first_segment_in_loop = 1
nr_segments_in_loop = 350
segment_duration_s = 6
default_tsbd_secs = 300

[[media]]
kind = "video"
timescale = 90000
representations = ["V300", "V600"]

[[media]]
kind = "audio"
timescale = 48000
representations = ["A48"]

[live]
availability_start_time = "2024-01-01T00:00:00Z"
start_number = 100
availability_time_offset = 0.0
time_shift_buffer_depth_s = 120
stop_number = 1000
splices_per_minute = 2
"#;

#[test]
fn load_full_config() {
    let dir = tempfile::tempdir().unwrap();
    let config = load_config(&write_config(&dir, FULL)).unwrap();

    assert_eq!(config.content.first_segment_in_loop, 1);
    assert_eq!(config.media.len(), 2);
    assert_eq!(config.media[1].kind, MediaKind::Audio);
    assert_eq!(config.media_for("V600").map(|m| m.timescale), Some(90000));
    assert_eq!(config.time_shift_buffer_depth_s(), 120);
    assert_eq!(config.live.stop_number, Some(1000));
    assert_eq!(config.live.availability_start_time.timestamp(), 1_704_067_200);
}

#[test]
fn explicit_path_takes_precedence() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, FULL);
    let config = load_config_or_default(Some(&path)).unwrap();
    assert_eq!(config.live.start_number, 100);
}

#[test]
fn mapper_follows_config() {
    let dir = tempfile::tempdir().unwrap();
    let config = load_config(&write_config(&dir, FULL)).unwrap();
    let mapper = LoopTimeMapper::from_config(&config);

    let ast = 1_704_067_200.0;
    match mapper.availability(ast + 6.0 * 351.0, 450) {
        Verdict::Available(mapping) => {
            // 350 segments after the start number wraps to the first VoD segment.
            assert_eq!(mapping.vod_nr, 1);
            assert_eq!(mapping.presentation_offset_s, 2100);
        }
        other => panic!("unexpected verdict {other:?}"),
    }
    assert_eq!(mapper.availability(ast + 1e6, 1000), Verdict::BeyondEnd);
}

#[test]
fn parse_errors_name_the_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, "[content\nbase_path = 1");
    let err = load_config(&path).unwrap_err();
    assert!(err.to_string().contains("Failed to parse config file"));
}

#[test]
fn validation_errors_are_reported() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, &FULL.replace("splices_per_minute = 2", "splices_per_minute = 7"));
    let err = load_config(&path).unwrap_err();
    assert!(err.to_string().contains("Splices per minute must divide 60"));

    let path = write_config(&dir, &FULL.replace("stop_number = 1000", "stop_number = 50"));
    assert!(load_config(&path).is_err());
}

#[test]
fn missing_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = load_config(&dir.path().join("absent.toml")).unwrap_err();
    assert!(err.to_string().contains("Failed to read config file"));
}
