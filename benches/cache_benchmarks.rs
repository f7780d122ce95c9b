//! Benchmarks for dfcache partition I/O and analytics
//!
//! Run with: cargo bench

use chrono::DateTime;
use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use dfcache::chunk::{decode_chunk, encode_chunk};
use dfcache::{DataKind, DfCache, FlatnessConfig, Frame, Timestamp, dedup, flatness_analysis};
use std::collections::HashMap;
use std::time::Duration;
use tempfile::TempDir;

fn ts(secs: i64) -> Timestamp {
    DateTime::from_timestamp(1_600_000_020 + secs, 0)
        .unwrap()
        .fixed_offset()
}

/// One row per minute per link.
fn traffic(minutes: i64, links: usize) -> Frame {
    let mut index = Vec::new();
    let mut link_col = Vec::new();
    let mut bytes = Vec::new();

    for m in 0..minutes {
        for l in 0..links {
            index.push(ts(m * 60));
            link_col.push(format!("r{l}:eth0"));
            bytes.push(((m * 7 + l as i64) % 100) as f64 * 1000.0);
        }
    }

    Frame::new(index)
        .with_column("link", link_col)
        .unwrap()
        .with_column("bytes", bytes)
        .unwrap()
}

/// Benchmark partition encoding and decoding
fn bench_chunk_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("chunk_codec");

    for rows in [100, 1_000, 10_000].iter() {
        let frame = traffic(*rows, 1);
        let encoded = encode_chunk(&frame).unwrap();

        group.bench_with_input(BenchmarkId::new("encode", rows), &frame, |b, frame| {
            b.iter(|| encode_chunk(black_box(frame)).unwrap());
        });
        group.bench_with_input(BenchmarkId::new("decode", rows), &encoded, |b, bytes| {
            b.iter(|| decode_chunk(black_box(bytes)).unwrap());
        });
    }

    group.finish();
}

/// Benchmark store followed by a full-range get
fn bench_store_and_get(c: &mut Criterion) {
    let temp_dir = TempDir::new().unwrap();
    let cache = DfCache::open(temp_dir.path()).unwrap();

    for day in 0..10 {
        let frame = traffic(1440, 4);
        let shifted = Frame::new(
            frame
                .index()
                .iter()
                .map(|t| *t + chrono::TimeDelta::days(day))
                .collect(),
        )
        .with_column("link", frame.text_column("link").unwrap().to_vec())
        .unwrap()
        .with_column("bytes", frame.float_column("bytes").unwrap().to_vec())
        .unwrap();
        cache.store(&shifted).unwrap();
    }

    c.bench_function("get_one_day_of_ten", |b| {
        b.iter(|| {
            cache
                .get(
                    black_box(Some(ts(3 * 86_400))),
                    black_box(Some(ts(4 * 86_400))),
                    None,
                )
                .unwrap()
        });
    });

    c.bench_function("files_in_range", |b| {
        b.iter(|| {
            cache
                .files_in_range(Some(ts(0)), Some(ts(5 * 86_400)), false)
                .unwrap()
        });
    });
}

/// Benchmark deduplication of a frame stored twice
fn bench_dedup(c: &mut Criterion) {
    let frame = traffic(1440, 4);
    let doubled = Frame::concat([frame.clone(), frame]).unwrap().unwrap();

    c.bench_function("dedup_time_link", |b| {
        b.iter(|| dedup(black_box(&doubled), &["time", "link"]).unwrap());
    });
}

/// Benchmark the full flatness pipeline
fn bench_flatness(c: &mut Criterion) {
    let mut group = c.benchmark_group("flatness_analysis");

    for links in [1, 10, 50].iter() {
        let frame = traffic(1440, *links);
        let speeds: HashMap<String, f64> = (0..*links)
            .map(|l| (format!("r{l}:eth0"), 1e6))
            .collect();
        let config = FlatnessConfig::new()
            .with_data_column("bytes", DataKind::Bytes)
            .with_window(Duration::from_secs(3600));

        group.bench_with_input(BenchmarkId::from_parameter(links), &frame, |b, frame| {
            b.iter(|| flatness_analysis(black_box(frame), &speeds, &config).unwrap());
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_chunk_codec,
    bench_store_and_get,
    bench_dedup,
    bench_flatness
);
criterion_main!(benches);
