//! Throughput benchmarks for the fanout broker.
//!
//! These measure how many publishes per second the broker accepts and
//! delivers for different subscriber counts and paces.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use fanout_bench::{broker_with_readers, payload, runtime, shutdown};
use fanout_core::Broker;
use std::time::Instant;

const MESSAGES: u64 = 1_000;

/// Benchmark publish + full delivery for growing fan-out.
fn bench_fanout(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("fanout");
    group.throughput(Throughput::Elements(MESSAGES));

    for readers in [1usize, 10, 100].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(readers), readers, |b, &readers| {
            b.iter_custom(|iters| {
                rt.block_on(async {
                    let mut elapsed = std::time::Duration::ZERO;
                    for _ in 0..iters {
                        let (broker, handles) = broker_with_readers(readers, 256).await;
                        let start = Instant::now();
                        for _ in 0..MESSAGES {
                            broker.publish(black_box(payload())).await.unwrap();
                        }
                        let delivered = shutdown(broker, handles).await;
                        elapsed += start.elapsed();
                        assert_eq!(delivered, MESSAGES * readers as u64);
                    }
                    elapsed
                })
            });
        });
    }

    group.finish();
}

/// Benchmark publish acceptance when one subscriber never reads.
fn bench_stalled_subscriber(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("stalled_subscriber");
    group.throughput(Throughput::Elements(MESSAGES));

    group.bench_function("publish_accept", |b| {
        b.iter_custom(|iters| {
            rt.block_on(async {
                let mut elapsed = std::time::Duration::ZERO;
                for _ in 0..iters {
                    let (broker, handles) = broker_with_readers(4, 256).await;
                    let stalled = broker.register(1).await.unwrap();

                    let start = Instant::now();
                    for _ in 0..MESSAGES {
                        broker.publish(black_box(payload())).await.unwrap();
                    }
                    elapsed += start.elapsed();

                    broker.unregister(stalled.id()).await;
                    shutdown(broker, handles).await;
                }
                elapsed
            })
        });
    });

    group.finish();
}

/// Benchmark publishing with no subscribers at all.
fn bench_publish_empty(c: &mut Criterion) {
    let rt = runtime();
    let broker: Broker<u64> = rt.block_on(async { Broker::new(fanout_bench::TIMEOUT, 1024) });

    c.bench_function("publish_no_subscribers", |b| {
        b.iter(|| rt.block_on(broker.publish(black_box(1))).unwrap());
    });
}

criterion_group!(
    benches,
    bench_fanout,
    bench_stalled_subscriber,
    bench_publish_empty,
);
criterion_main!(benches);
