//! Benchmarks for chart series storage
//!
//! Run with: cargo bench

use campus_pulse::aggregator::decode_snapshot;
use campus_pulse::model::{Domain, Sample};
use campus_pulse::timeseries::{TimeSeries, TimeSeriesStore};
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use serde_json::{json, Map, Value};

fn create_samples(count: usize) -> Vec<Sample> {
    (0..count)
        .map(|i| Sample::new(i as i64 * 30_000, (i % 100) as f64))
        .collect()
}

fn bench_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("append");

    for size in [360, 3600] {
        let samples = create_samples(size);
        group.throughput(Throughput::Elements(size as u64));

        group.bench_function(format!("in_order_{}", size), |b| {
            b.iter(|| {
                let mut store = TimeSeriesStore::new(360);
                for sample in &samples {
                    store.append(Domain::Parking, "P1", "places_disponibles", *sample);
                }
                black_box(store.stats())
            })
        });

        // late samples land inside a full buffer
        let mut shuffled = samples.clone();
        shuffled.reverse();
        shuffled.rotate_left(size / 3);

        group.bench_function(format!("out_of_order_{}", size), |b| {
            b.iter(|| {
                let mut series = TimeSeries::with_capacity(360);
                for sample in &shuffled {
                    series.insert(*sample);
                }
                black_box(series.len())
            })
        });
    }

    group.finish();
}

fn bench_replace_history(c: &mut Criterion) {
    let mut group = c.benchmark_group("replace_history");

    for size in [360, 10000] {
        let samples = create_samples(size);
        group.throughput(Throughput::Elements(size as u64));

        group.bench_function(format!("load_{}", size), |b| {
            let mut store = TimeSeriesStore::new(360);
            b.iter(|| {
                store.replace_history(
                    Domain::Wifi,
                    "AP001",
                    "puissance_signal",
                    black_box(samples.iter().copied()),
                )
            })
        });
    }

    group.finish();
}

fn bench_decode_snapshot(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_snapshot");

    let body = Value::Object((0..500)
        .map(|i| (
            format!("BUS{:03}", i),
            json!({
                "ligne": "12",
                "en_service": i % 3 != 0,
                "passagers": i % 60,
                "capacite": 60,
                "latitude": 48.85 + i as f64 * 1e-4,
                "longitude": 2.35,
                "timestamp": 1_700_000_000.0,
            })
        ))
        .collect::<Map<String, Value>>());
    group.throughput(Throughput::Elements(500));

    group.bench_function("buses_500", |b| {
        b.iter(|| decode_snapshot(Domain::TransportBus, black_box(body.clone()), 0).unwrap())
    });

    group.finish();
}

criterion_group!(benches, bench_append, bench_replace_history, bench_decode_snapshot);
criterion_main!(benches);
