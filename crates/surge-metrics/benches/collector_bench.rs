use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use surge_metrics::MetricsCollector;

fn bench_record(c: &mut Criterion) {
    let mut group = c.benchmark_group("collector_record");

    group.bench_function("counter", |b| {
        let collector = MetricsCollector::new();
        b.iter(|| collector.add(black_box("http_reqs"), 1.0).unwrap());
    });

    group.bench_function("rate", |b| {
        let collector = MetricsCollector::new();
        let mut flip = false;
        b.iter(|| {
            flip = !flip;
            collector.observe(black_box("errors"), flip).unwrap()
        });
    });

    group.bench_function("trend", |b| {
        let collector = MetricsCollector::new();
        let mut v = 0.0;
        b.iter(|| {
            v += 1.0;
            collector.time(black_box("http_req_duration"), v).unwrap()
        });
    });

    group.finish();
}

fn bench_contended(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .build()
        .unwrap();

    let mut group = c.benchmark_group("collector_contended");
    for tasks in [4usize, 16, 64] {
        group.bench_with_input(BenchmarkId::from_parameter(tasks), &tasks, |b, &tasks| {
            b.to_async(&runtime).iter(|| async move {
                let collector = Arc::new(MetricsCollector::new());
                let handles: Vec<_> = (0..tasks)
                    .map(|_| {
                        let collector = Arc::clone(&collector);
                        tokio::spawn(async move {
                            for i in 0..1000 {
                                collector.time("http_req_duration", i as f64).unwrap();
                                collector.observe("http_req_failed", false).unwrap();
                            }
                        })
                    })
                    .collect();
                for handle in handles {
                    handle.await.unwrap();
                }
            });
        });
    }
    group.finish();
}

fn bench_snapshot(c: &mut Criterion) {
    let collector = MetricsCollector::new();
    for i in 0..100_000 {
        collector.time("http_req_duration", (i % 977) as f64).unwrap();
    }
    c.bench_function("snapshot_100k_trend", |b| {
        b.iter(|| black_box(collector.snapshot()));
    });
}

criterion_group!(benches, bench_record, bench_contended, bench_snapshot);
criterion_main!(benches);
