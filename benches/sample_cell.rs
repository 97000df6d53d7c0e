//! Sample cell and local connection benchmarks.

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use topiclink::memory::{ReadCursor, SampleCell};
use topiclink::prelude::*;

fn bench_cell_write(c: &mut Criterion) {
    let mut group = c.benchmark_group("cell_write");

    for len in [8usize, 256, 4096] {
        let cell = SampleCell::new(vec![0u8; len]);
        let value = vec![7u8; len];

        group.throughput(Throughput::Bytes(len as u64));
        group.bench_with_input(BenchmarkId::from_parameter(len), &value, |b, value| {
            b.iter(|| cell.write(value.clone()).unwrap());
        });
    }

    group.finish();
}

fn bench_cell_write_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("cell_write_read");
    group.throughput(Throughput::Elements(1));

    let cell = SampleCell::new(0u64);
    let cursor = ReadCursor::new();
    let mut out = 0u64;
    let mut seq = 0u64;
    group.bench_function("u64", |b| {
        b.iter(|| {
            seq += 1;
            cell.write(seq).unwrap();
            std::hint::black_box(cell.read(&cursor, &mut out, false));
        });
    });

    group.finish();
}

fn bench_cell_read_contended(c: &mut Criterion) {
    let mut group = c.benchmark_group("cell_read_contended");
    group.throughput(Throughput::Elements(1));

    let cell = Arc::new(SampleCell::with_readers(vec![0u64; 64], 2));
    let stop = Arc::new(AtomicBool::new(false));
    let writer = {
        let cell = Arc::clone(&cell);
        let stop = Arc::clone(&stop);
        std::thread::spawn(move || {
            let mut seq = 0u64;
            while !stop.load(Ordering::Relaxed) {
                seq += 1;
                let _ = cell.write(vec![seq; 64]);
            }
        })
    };

    let cursor = ReadCursor::new();
    let mut out = Vec::new();
    group.bench_function("reader_vs_busy_writer", |b| {
        b.iter(|| std::hint::black_box(cell.read(&cursor, &mut out, true)));
    });

    stop.store(true, Ordering::Relaxed);
    writer.join().unwrap();
    group.finish();
}

fn bench_local_publish_dispatch(c: &mut Criterion) {
    let mut group = c.benchmark_group("local_publish_dispatch");
    group.throughput(Throughput::Elements(1));

    let node = Node::new(TransportConfig::local_only());
    let subscriber = node
        .subscribe::<u64, _>("/bench/local", |v| {
            std::hint::black_box(v);
        })
        .unwrap();
    let publisher = node
        .advertise::<u64>("/bench/local", AdvertiseOptions::default())
        .unwrap();

    let mut seq = 0u64;
    group.bench_function("u64", |b| {
        b.iter(|| {
            seq += 1;
            publisher.publish(&seq).unwrap();
            subscriber.dispatch()
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_cell_write,
    bench_cell_write_read,
    bench_cell_read_contended,
    bench_local_publish_dispatch
);
criterion_main!(benches);
