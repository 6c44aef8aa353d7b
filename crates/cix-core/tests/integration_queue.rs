//! Concurrency tests for the priority request queue.

use cix_core::PriorityQueue;
use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

#[test]
fn test_each_id_delivered_exactly_once() {
    const PRODUCERS: u64 = 4;
    const CONSUMERS: usize = 3;
    const IDS: u64 = 200;

    let queue: Arc<PriorityQueue<u64, u64>> = Arc::new(PriorityQueue::new());

    // Every producer submits every id, so most puts replace a queued entry.
    let producers: Vec<_> = (0..PRODUCERS)
        .map(|p| {
            let queue = queue.clone();
            thread::spawn(move || {
                for id in 0..IDS {
                    queue.put(((id + p) % 7) as u32, id, p);
                }
            })
        })
        .collect();

    let consumers: Vec<_> = (0..CONSUMERS)
        .map(|_| {
            let queue = queue.clone();
            thread::spawn(move || {
                let mut seen = Vec::new();
                while let Some((id, _)) = queue.get() {
                    seen.push(id);
                }
                seen
            })
        })
        .collect();

    for producer in producers {
        producer.join().unwrap();
    }
    queue.close();

    let mut delivered = Vec::new();
    for consumer in consumers {
        delivered.extend(consumer.join().unwrap());
    }

    // An id can be redelivered only if it was resubmitted after a consumer
    // took it, which happens at most once per producer.
    let distinct: HashSet<u64> = delivered.iter().copied().collect();
    assert_eq!(distinct.len() as u64, IDS);
    assert!(delivered.len() as u64 <= IDS * PRODUCERS);
    assert!(queue.is_empty());
}

#[test]
fn test_resubmissions_before_delivery_collapse() {
    let queue: Arc<PriorityQueue<u64, u64>> = Arc::new(PriorityQueue::new());

    let producers: Vec<_> = (0..4u64)
        .map(|p| {
            let queue = queue.clone();
            thread::spawn(move || {
                for id in 0..50u64 {
                    queue.put(1, id, p);
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().unwrap();
    }
    assert_eq!(queue.len(), 50);
    queue.close();

    let consumers: Vec<_> = (0..3)
        .map(|_| {
            let queue = queue.clone();
            thread::spawn(move || std::iter::from_fn(|| queue.get()).collect::<Vec<_>>())
        })
        .collect();

    let mut delivered: Vec<u64> = consumers
        .into_iter()
        .flat_map(|c| c.join().unwrap())
        .map(|(id, _)| id)
        .collect();
    delivered.sort_unstable();
    assert_eq!(delivered, (0..50).collect::<Vec<_>>());
}

#[test]
fn test_remove_id_races_with_consumers() {
    let queue: Arc<PriorityQueue<u64, ()>> = Arc::new(PriorityQueue::new());
    for id in 0..100 {
        queue.put(1, id, ());
    }

    let canceller = {
        let queue = queue.clone();
        thread::spawn(move || (0..100).filter(|id| id % 2 == 0 && queue.remove_id(id)).count())
    };
    let consumer = {
        let queue = queue.clone();
        thread::spawn(move || std::iter::from_fn(|| queue.try_get()).count())
    };

    let cancelled = canceller.join().unwrap();
    let consumed = consumer.join().unwrap();
    let rest = std::iter::from_fn(|| queue.try_get()).count();
    assert_eq!(cancelled + consumed + rest, 100);
}
