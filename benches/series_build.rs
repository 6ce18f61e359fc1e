use std::collections::BTreeSet;

use chrono::{Duration, TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use nodewatch::{build_series, DisplayMode, IngestBuffer, MetricRecord, SeriesOptions};

const FIELDS: &[&str] = &["total_sent", "current_round", "active_peers", "resent"];

/// A log of `rows` instants x `nodes` nodes x every field, in arrival order.
fn make_log(rows: usize, nodes: usize) -> (IngestBuffer, BTreeSet<String>) {
    let start = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
    let names: Vec<String> = (0..nodes).map(|n| format!("node_{n}")).collect();
    let mut buffer = IngestBuffer::new();
    for row in 0..rows {
        let at = start + Duration::seconds(row as i64);
        let records = names.iter().flat_map(|node| {
            FIELDS.iter().map(move |field| {
                MetricRecord::new(at, *field, node.as_str(), (row * 3) as f64).unwrap()
            })
        });
        buffer.ingest_records(records);
    }
    (buffer, names.into_iter().collect())
}

/// Benchmark matrix assembly as the log grows
fn bench_build_series_log_size(c: &mut Criterion) {
    let mut group = c.benchmark_group("build_series_log_size");
    let options = SeriesOptions {
        window: None,
        ..SeriesOptions::default()
    };

    for rows in [100usize, 1_000, 10_000].iter() {
        let (buffer, nodes) = make_log(*rows, 10);
        group.bench_with_input(BenchmarkId::from_parameter(rows), rows, |b, _| {
            b.iter(|| {
                build_series(
                    black_box(buffer.records()),
                    black_box("total_sent"),
                    &nodes,
                    &options,
                )
            });
        });
    }
    group.finish();
}

/// Benchmark each display transform on the same log
fn bench_build_series_modes(c: &mut Criterion) {
    let mut group = c.benchmark_group("build_series_modes");
    let (buffer, nodes) = make_log(2_000, 10);

    for mode in [
        DisplayMode::Raw,
        DisplayMode::Delta,
        DisplayMode::Rate,
        DisplayMode::Normalized,
    ] {
        let options = SeriesOptions {
            mode,
            ..SeriesOptions::default()
        };
        group.bench_with_input(BenchmarkId::from_parameter(mode), &mode, |b, _| {
            b.iter(|| build_series(black_box(buffer.records()), "resent", &nodes, &options));
        });
    }
    group.finish();
}

/// Benchmark ingesting a batch that is entirely redelivered
fn bench_ingest_duplicates(c: &mut Criterion) {
    let batch: Vec<serde_json::Value> = (0..1_000)
        .map(|i| {
            serde_json::json!({
                "timestamp": format!("2024-05-01T10:{:02}:{:02}Z", i / 60 % 60, i % 60),
                "field": "total_sent",
                "node": format!("node_{}", i % 10),
                "value": i,
            })
        })
        .collect();
    let mut buffer = IngestBuffer::new();
    buffer.ingest(&batch);

    c.bench_function("ingest_duplicate_batch", |b| {
        b.iter(|| buffer.ingest(black_box(&batch)));
    });
}

criterion_group!(
    benches,
    bench_build_series_log_size,
    bench_build_series_modes,
    bench_ingest_duplicates,
);
criterion_main!(benches);
