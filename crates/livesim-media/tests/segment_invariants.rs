//! Structural checks over every kind of generated segment.

use bytes::Bytes;
use livesim_media::boxes::default_containers;
use livesim_media::fmp4::write_styp;
use livesim_media::{
    inspect_init, live_init, mux_init, mux_media, rewrite_segment, BoxFilter, BoxType, Chunker,
    HandlerType, InitSegmentBuilder, MoofBuilder, RewriteOptions, Sample,
};

/// Check raw size fields: every container equals its header plus its
/// children, and top-level boxes exactly cover the buffer.
fn assert_sizes(data: &[u8]) {
    fn walk(data: &[u8], start: usize, end: usize) {
        let containers = default_containers();
        let mut pos = start;
        while pos < end {
            assert!(pos + 8 <= end, "truncated header at {pos}");
            let size = u32::from_be_bytes(data[pos..pos + 4].try_into().unwrap()) as usize;
            let box_type = BoxType::from_bytes(data[pos + 4..pos + 8].try_into().unwrap());
            assert!(size >= 8, "{box_type} at {pos} has size {size}");
            assert!(pos + size <= end, "{box_type} at {pos} overruns its parent");
            if containers.contains(&box_type) {
                walk(data, pos + 8, pos + size);
            }
            pos += size;
        }
        assert_eq!(pos, end);
    }
    walk(data, 0, data.len());
}

fn samples(count: u8, size: usize) -> Vec<Sample> {
    (0..count)
        .map(|i| Sample {
            duration: 90_000,
            size: size as u32,
            is_sync: i == 0,
            cto: 0,
            data: Bytes::from(vec![i; size]),
        })
        .collect()
}

fn media(track_id: u32, decode_time: u64) -> Vec<u8> {
    [
        write_styp(*b"msdh", &[*b"msdh", *b"msix"]),
        MoofBuilder::new(1, track_id)
            .base_media_decode_time(decode_time)
            .build(&samples(6, 32)),
    ]
    .concat()
}

fn options(sequence_number: u32, offset_seconds: u64) -> RewriteOptions {
    RewriteOptions {
        sequence_number,
        offset_seconds,
        timescale: 90_000,
        splices_per_minute: 1,
        ..Default::default()
    }
}

#[test]
fn noop_filter_is_identity() {
    let input = media(1, 540_000);
    let filter: BoxFilter<()> = BoxFilter::new();
    assert_eq!(filter.filter(&input, &mut ()).unwrap(), input);
}

#[test]
fn rewritten_segments_keep_sizes_consistent() {
    let input = media(1, 0);
    // Crosses the 32-bit decode time boundary and carries splice events.
    for offset_seconds in [0, 54, 47_721, 47_730, 1_000_000] {
        let out = rewrite_segment(&input, &options(7, offset_seconds)).unwrap();
        assert_sizes(&out.data);
    }
}

#[test]
fn rewriting_stable_output_is_idempotent() {
    let first = rewrite_segment(&media(1, 0), &options(3, 0)).unwrap();
    let again = rewrite_segment(&first.data, &options(3, 0)).unwrap();
    assert_eq!(again.data, first.data);
}

#[test]
fn muxed_and_chunked_segments_keep_sizes_consistent() {
    let video = rewrite_segment(&media(1, 0), &options(10, 60)).unwrap();
    let audio = rewrite_segment(&media(2, 0), &options(10, 60)).unwrap();
    let muxed = mux_media(&video.data, &audio.data).unwrap();
    assert_sizes(&muxed);

    let chunks: Vec<_> = Chunker::new(Bytes::from(video.data), 2, 0.0, 90_000)
        .unwrap()
        .collect();
    assert_eq!(chunks.len(), 3);
    for chunk in &chunks {
        assert_sizes(&chunk.data);
    }
}

#[test]
fn live_and_muxed_init_segments_keep_sizes_consistent() {
    let video = InitSegmentBuilder::new()
        .track_id(1)
        .duration(900_000)
        .fragment_duration(900_000)
        .wide_headers()
        .build();
    let audio = InitSegmentBuilder::new()
        .track_id(2)
        .timescale(48_000)
        .handler(HandlerType::Audio)
        .audio(2, 48_000)
        .build();

    let live = live_init(&video).unwrap();
    assert_sizes(&live);
    assert_eq!(inspect_init(&live).unwrap().duration, 0);

    let muxed = mux_init(&live, &audio).unwrap();
    assert_sizes(&muxed);
}
