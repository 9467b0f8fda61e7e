//! Benchmarks for the packet queue and batch payload building
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use packet_bridge::pipeline::PacketQueue;
use packet_bridge::Batch;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn make_batch(seq: usize, packets: usize) -> Batch {
    Batch::from_texts((0..packets).map(|i| format!("pkt-{seq:06}-{i:02}")))
        .expect("at least one packet")
}

fn bench_push_pop(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_push_pop");

    for capacity in [16, 100, 1_000].iter() {
        group.throughput(Throughput::Elements(1));
        group.bench_with_input(
            BenchmarkId::from_parameter(capacity),
            capacity,
            |b, &capacity| {
                let queue = PacketQueue::new(capacity);
                let batch = make_batch(0, 4);
                b.iter(|| {
                    let _ = queue.try_push(black_box(batch.clone()));
                    black_box(queue.try_pop());
                });
            },
        );
    }

    group.finish();
}

fn bench_producer_consumer(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_producer_consumer");
    const BATCHES: usize = 1_000;
    group.throughput(Throughput::Elements(BATCHES as u64));

    group.bench_function("1000_batches_cap_100", |b| {
        b.iter(|| {
            let queue = Arc::new(PacketQueue::new(100));
            let producer = {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    for seq in 0..BATCHES {
                        let _ = queue.push(make_batch(seq, 2), Duration::from_secs(1));
                    }
                })
            };
            let mut received = 0;
            while received < BATCHES {
                if queue.pop_timeout(Duration::from_millis(100)).is_some() {
                    received += 1;
                }
            }
            let _ = producer.join();
            black_box(received)
        });
    });

    group.finish();
}

fn bench_payload(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch_payload");

    for packets in [1, 8, 64].iter() {
        let batch = make_batch(1, *packets);
        group.bench_with_input(BenchmarkId::from_parameter(packets), &batch, |b, batch| {
            b.iter(|| black_box(batch.payload()));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_push_pop, bench_producer_consumer, bench_payload);
criterion_main!(benches);
