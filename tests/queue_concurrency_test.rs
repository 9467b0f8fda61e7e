//! Concurrency tests for the packet queue
//!
//! One producer and one consumer thread hammer a small queue; every batch
//! must come out exactly once and in the order it went in.

mod common;

use common::builders::numbered;
use packet_bridge::pipeline::{PacketQueue, PushError};
use packet_bridge::Batch;
use proptest::prelude::*;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const TOTAL: usize = 10_000;

fn seq_of(batch: &Batch) -> usize {
    batch.packets()[0].as_str().parse().unwrap()
}

#[test]
fn test_interleaved_push_pop_preserves_order() {
    let queue = Arc::new(PacketQueue::new(100));

    let producer = {
        let queue = Arc::clone(&queue);
        thread::spawn(move || {
            for seq in 0..TOTAL {
                // Generous timeout: the consumer keeps up, nothing may drop
                queue.push(numbered(seq), Duration::from_secs(5)).unwrap();
            }
        })
    };

    let mut received = Vec::with_capacity(TOTAL);
    while received.len() < TOTAL {
        if let Some(batch) = queue.pop_timeout(Duration::from_secs(5)) {
            received.push(seq_of(&batch));
        } else {
            panic!("consumer starved after {} batches", received.len());
        }
    }
    producer.join().unwrap();

    assert_eq!(received, (0..TOTAL).collect::<Vec<_>>());
    let stats = queue.stats();
    assert_eq!(stats.pushed, TOTAL as u64);
    assert_eq!(stats.popped, TOTAL as u64);
    assert_eq!(stats.dropped, 0);
    assert!(stats.high_water <= 100);
    assert!(queue.is_empty());
}

#[test]
fn test_slow_consumer_drops_are_counted() {
    let queue = Arc::new(PacketQueue::new(4));

    let producer = {
        let queue = Arc::clone(&queue);
        thread::spawn(move || {
            let mut dropped = Vec::new();
            for seq in 0..50 {
                if let Err(PushError::Full(batch)) = queue.push(numbered(seq), Duration::ZERO) {
                    dropped.push(seq_of(&batch));
                }
            }
            dropped
        })
    };
    let dropped = producer.join().unwrap();

    let kept: Vec<usize> = queue.drain_all().iter().map(seq_of).collect();
    assert_eq!(kept, vec![0, 1, 2, 3]);
    assert_eq!(dropped.len(), 46);
    assert_eq!(queue.stats().dropped, 46);
    assert_eq!(queue.stats().drained, 4);
}

#[test]
fn test_blocked_push_completes_when_space_frees() {
    let queue = Arc::new(PacketQueue::new(1));
    queue.try_push(numbered(0)).unwrap();

    let producer = {
        let queue = Arc::clone(&queue);
        thread::spawn(move || queue.push(numbered(1), Duration::from_secs(5)))
    };

    thread::sleep(Duration::from_millis(20));
    assert_eq!(seq_of(&queue.try_pop().unwrap()), 0);
    assert!(producer.join().unwrap().is_ok());
    assert_eq!(seq_of(&queue.try_pop().unwrap()), 1);
}

proptest! {
    #[test]
    fn prop_queue_never_exceeds_capacity(
        capacity in 1usize..16,
        ops in proptest::collection::vec(any::<bool>(), 0..200),
    ) {
        let queue = PacketQueue::new(capacity);
        let mut next = 0usize;
        let mut expected_front = 0usize;

        for push in ops {
            if push {
                if queue.try_push(numbered(next)).is_ok() {
                    next += 1;
                }
            } else if let Some(batch) = queue.try_pop() {
                prop_assert_eq!(seq_of(&batch), expected_front);
                expected_front += 1;
            }
            prop_assert!(queue.len() <= capacity);
        }
        prop_assert_eq!(queue.len(), next - expected_front);
    }
}
