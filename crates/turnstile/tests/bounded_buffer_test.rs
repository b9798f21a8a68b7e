//! # Bounded Buffer Verification
//!
//! The classic monitor built on one mutex and two conditions: a
//! fixed-capacity queue where producers block on `not_full` and
//! consumers block on `not_empty`. Exercises condition waits, signal
//! handoff, and reacquisition under sustained producer/consumer
//! traffic.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread;
use turnstile::{Condition, Lock, LockResult, ReentrantMutex};

const CAPACITY: usize = 10;

struct BoundedBuffer {
    lock: Arc<ReentrantMutex>,
    not_full: Condition,
    not_empty: Condition,
    /// Plain storage; only ever touched while `lock` is held. The
    /// inner mutex exists solely to satisfy `Sync` without unsafe
    /// code, so it is never contended.
    items: Mutex<VecDeque<u64>>,
}

impl BoundedBuffer {
    fn new() -> Self {
        let lock = Arc::new(ReentrantMutex::new());
        Self {
            not_full: lock.new_condition(),
            not_empty: lock.new_condition(),
            lock,
            items: Mutex::new(VecDeque::with_capacity(CAPACITY)),
        }
    }

    fn put(&self, value: u64) -> LockResult<()> {
        self.lock.lock()?;
        while self.items.lock().len() == CAPACITY {
            self.not_full.wait()?;
        }
        {
            let mut items = self.items.lock();
            items.push_back(value);
            assert!(items.len() <= CAPACITY, "buffer overfilled");
        }
        self.not_empty.signal()?;
        self.lock.unlock()
    }

    fn take(&self) -> LockResult<u64> {
        self.lock.lock()?;
        while self.items.lock().is_empty() {
            self.not_empty.wait()?;
        }
        let value = {
            let mut items = self.items.lock();
            // The wait loop re-checked under the lock; emptiness here
            // would mean a waiter returned without its predicate.
            items.pop_front().unwrap_or_else(|| panic!("take from empty buffer"))
        };
        self.not_full.signal()?;
        self.lock.unlock()?;
        Ok(value)
    }
}

#[test]
fn test_single_producer_single_consumer() {
    const ITEMS: u64 = 1_000;
    let buffer = Arc::new(BoundedBuffer::new());

    let producer = {
        let buffer = Arc::clone(&buffer);
        thread::spawn(move || {
            for value in 0..ITEMS {
                buffer.put(value).unwrap();
            }
        })
    };
    let consumer = {
        let buffer = Arc::clone(&buffer);
        thread::spawn(move || {
            // FIFO through the buffer: one producer, one consumer.
            (0..ITEMS).map(|_| buffer.take().unwrap()).collect::<Vec<_>>()
        })
    };

    producer.join().unwrap();
    let received = consumer.join().unwrap();
    assert_eq!(received, (0..ITEMS).collect::<Vec<_>>());
    assert!(buffer.items.lock().is_empty());
}

#[test]
fn test_many_producers_many_consumers() {
    const PRODUCERS: u64 = 4;
    const CONSUMERS: u64 = 4;
    const PER_PRODUCER: u64 = 250;

    let buffer = Arc::new(BoundedBuffer::new());

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|p| {
            let buffer = Arc::clone(&buffer);
            thread::spawn(move || {
                for i in 0..PER_PRODUCER {
                    buffer.put(p * PER_PRODUCER + i).unwrap();
                }
            })
        })
        .collect();

    let consumers: Vec<_> = (0..CONSUMERS)
        .map(|_| {
            let buffer = Arc::clone(&buffer);
            thread::spawn(move || {
                let per_consumer = PRODUCERS * PER_PRODUCER / CONSUMERS;
                (0..per_consumer)
                    .map(|_| buffer.take().unwrap())
                    .collect::<Vec<u64>>()
            })
        })
        .collect();

    for producer in producers {
        producer.join().unwrap();
    }
    let mut all: Vec<u64> = consumers
        .into_iter()
        .flat_map(|c| c.join().unwrap())
        .collect();
    all.sort_unstable();

    // Every produced value consumed exactly once, nothing invented.
    assert_eq!(all, (0..PRODUCERS * PER_PRODUCER).collect::<Vec<_>>());
    assert!(buffer.items.lock().is_empty());
    assert!(!buffer.lock.is_locked());
}

#[test]
fn test_producer_blocks_at_capacity() {
    let buffer = Arc::new(BoundedBuffer::new());
    for value in 0..CAPACITY as u64 {
        buffer.put(value).unwrap();
    }

    // The next put must block until a slot opens.
    let producer = {
        let buffer = Arc::clone(&buffer);
        thread::spawn(move || buffer.put(99).unwrap())
    };

    // Confirm the producer reached the not_full wait.
    loop {
        buffer.lock.lock().unwrap();
        let blocked = buffer.not_full.has_waiters().unwrap();
        buffer.lock.unlock().unwrap();
        if blocked {
            break;
        }
        thread::yield_now();
    }
    assert_eq!(buffer.items.lock().len(), CAPACITY);

    assert_eq!(buffer.take().unwrap(), 0);
    producer.join().unwrap();
    assert_eq!(buffer.items.lock().len(), CAPACITY);
}
