//! Segment codec benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use strata_bench::utils::{build_segment, random_data, state_like_words};
use strata_codec::{CancelToken, Compressor, CompressorConfig};
use tempfile::TempDir;

/// Benchmark compressing words with a repetitive prefix.
fn bench_compress(c: &mut Criterion) {
    let mut group = c.benchmark_group("compress");
    group.sample_size(10);

    for count in [1_000usize, 10_000].iter() {
        let words = state_like_words(*count, 24);
        let bytes: usize = words.iter().map(Vec::len).sum();
        group.throughput(Throughput::Bytes(bytes as u64));

        for workers in [1usize, 4].iter() {
            group.bench_with_input(
                BenchmarkId::new(format!("workers_{workers}"), count),
                &words,
                |b, words| {
                    let dir = TempDir::new().unwrap();
                    let path = dir.path().join("bench.seg");
                    b.iter(|| {
                        let mut c = Compressor::new(&path, CompressorConfig::default().workers(*workers));
                        for w in words {
                            c.add_word(w);
                        }
                        black_box(c.compress(&CancelToken::new()).unwrap());
                    });
                },
            );
        }
    }

    group.finish();
}

/// Benchmark a full sequential scan.
fn bench_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("scan");

    for count in [1_000usize, 10_000].iter() {
        let dir = TempDir::new().unwrap();
        let words = state_like_words(*count, 24);
        let segment = build_segment(&dir.path().join("scan.seg"), &words, CompressorConfig::default());
        group.throughput(Throughput::Elements(*count as u64));

        group.bench_with_input(BenchmarkId::from_parameter(count), &segment, |b, segment| {
            let mut buf = Vec::new();
            b.iter(|| {
                let mut g = segment.make_getter();
                while g.has_next() {
                    g.next(&mut buf).unwrap();
                }
                black_box(buf.len());
            });
        });
    }

    group.finish();
}

/// Benchmark random access through the offset table, against skipping.
fn bench_random_access(c: &mut Criterion) {
    let mut group = c.benchmark_group("random_access");
    let dir = TempDir::new().unwrap();
    let words: Vec<Vec<u8>> = (0..10_000).map(|_| random_data(40)).collect();
    let segment = build_segment(
        &dir.path().join("offsets.seg"),
        &words,
        CompressorConfig::default().with_offsets(true),
    );
    let offsets = segment.offsets().unwrap().to_vec();

    group.bench_function("reset", |b| {
        let mut g = segment.make_getter();
        let mut i = 0usize;
        b.iter(|| {
            i = (i + 7919) % offsets.len();
            g.reset(offsets[i]).unwrap();
            black_box(g.next_word().unwrap());
        });
    });

    group.bench_function("skip_100", |b| {
        b.iter(|| {
            let mut g = segment.make_getter();
            for _ in 0..100 {
                g.skip().unwrap();
            }
            black_box(g.next_word().unwrap());
        });
    });

    group.finish();
}

criterion_group!(benches, bench_compress, bench_scan, bench_random_access);
criterion_main!(benches);
