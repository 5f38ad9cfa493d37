//! Benchmarks for live segment production.
//!
//! Measures the box-tree rewrite, mux and chunking paths on synthetic
//! segments of typical sizes.

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use livesim_media::fmp4::write_styp;
use livesim_media::{mux_media, Chunker, MediaSegmentRewriter, MoofBuilder, RewriteOptions, Sample};

/// A 6-second, 25 fps segment with samples of `sample_size` bytes.
fn segment(track_id: u32, sample_size: usize) -> Vec<u8> {
    let samples: Vec<Sample> = (0..150)
        .map(|i| Sample {
            duration: 3600,
            size: sample_size as u32,
            is_sync: i % 50 == 0,
            cto: 0,
            data: Bytes::from(vec![0u8; sample_size]),
        })
        .collect();
    [
        write_styp(*b"msdh", &[*b"msdh", *b"msix"]),
        MoofBuilder::new(1, track_id).build(&samples),
    ]
    .concat()
}

fn bench_rewrite(c: &mut Criterion) {
    let mut group = c.benchmark_group("segment_rewrite");
    let rewriter = MediaSegmentRewriter::new();

    for sample_size in [512, 4 * 1024, 16 * 1024] {
        let input = segment(1, sample_size);
        group.throughput(Throughput::Bytes(input.len() as u64));

        group.bench_function(format!("rewrite_32bit_{}", sample_size), |b| {
            let options = RewriteOptions {
                sequence_number: 350,
                offset_seconds: 2100,
                timescale: 90_000,
                ..Default::default()
            };
            b.iter(|| black_box(rewriter.rewrite(black_box(&input), &options)))
        });

        group.bench_function(format!("rewrite_64bit_splice_{}", sample_size), |b| {
            // Offset large enough to promote tfdt to 64 bits.
            let options = RewriteOptions {
                sequence_number: 1_000_000,
                offset_seconds: 6_000_000,
                timescale: 90_000,
                splices_per_minute: 10,
                ..Default::default()
            };
            b.iter(|| black_box(rewriter.rewrite(black_box(&input), &options)))
        });
    }

    group.finish();
}

fn bench_mux_and_chunk(c: &mut Criterion) {
    let mut group = c.benchmark_group("segment_assembly");
    let video = segment(1, 4 * 1024);
    let audio = segment(2, 512);

    group.throughput(Throughput::Bytes((video.len() + audio.len()) as u64));
    group.bench_function("mux_media", |b| {
        b.iter(|| black_box(mux_media(black_box(&video), black_box(&audio))))
    });

    let video = Bytes::from(video);
    group.bench_function("chunk_all", |b| {
        b.iter(|| {
            let chunker = Chunker::new(video.clone(), 25, 0.0, 90_000).unwrap();
            black_box(chunker.map(|chunk| chunk.data.len()).sum::<usize>())
        })
    });

    group.finish();
}

criterion_group!(benches, bench_rewrite, bench_mux_and_chunk);
criterion_main!(benches);
