//! # Mutex Verification
//!
//! Cross-thread verification of [`ReentrantMutex`]: mutual exclusion
//! under contention, reentrancy accounting, fair FIFO admission, and
//! timed-acquire cancellation cleanup.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use turnstile::{Fairness, Lock, LockError, ReentrantMutex};

/// Spin until `predicate` holds, bounded so a regression fails the
/// test instead of hanging it.
fn wait_until(predicate: impl Fn() -> bool) {
    for _ in 0..10_000 {
        if predicate() {
            return;
        }
        thread::sleep(Duration::from_micros(100));
    }
    panic!("condition not reached within bound");
}

#[test]
fn test_mutual_exclusion_under_contention() {
    const THREADS: usize = 8;
    const ROUNDS: u64 = 500;

    let mutex = Arc::new(ReentrantMutex::new());
    // Non-atomic read-modify-write (load, yield, store): torn updates
    // show up as a wrong final count unless the lock excludes them.
    let counter = Arc::new(AtomicU64::new(0));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let mutex = Arc::clone(&mutex);
            let counter = Arc::clone(&counter);
            thread::spawn(move || {
                for _ in 0..ROUNDS {
                    mutex.lock().unwrap();
                    let seen = counter.load(Ordering::Relaxed);
                    thread::yield_now();
                    counter.store(seen + 1, Ordering::Relaxed);
                    mutex.unlock().unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(counter.load(Ordering::Relaxed), THREADS as u64 * ROUNDS);
    assert!(!mutex.is_locked());
    assert_eq!(mutex.queued_count(), 0);
}

#[test]
fn test_deep_reentrancy_and_over_unlock() {
    const DEPTH: usize = 64;
    let mutex = ReentrantMutex::new();

    for level in 1..=DEPTH {
        mutex.lock().unwrap();
        assert_eq!(mutex.hold_count(), level as i64);
    }
    for level in (0..DEPTH).rev() {
        mutex.unlock().unwrap();
        assert_eq!(mutex.hold_count(), level as i64);
    }
    assert!(!mutex.is_locked());
    assert_eq!(mutex.unlock(), Err(LockError::NotOwner));
}

#[test]
fn test_unlock_from_non_owner_thread_faults() {
    let mutex = Arc::new(ReentrantMutex::new());
    mutex.lock().unwrap();

    let remote = Arc::clone(&mutex);
    let fault = thread::spawn(move || remote.unlock())
        .join()
        .unwrap();
    assert_eq!(fault, Err(LockError::NotOwner));

    // The failed remote unlock must not have damaged the hold.
    assert!(mutex.is_held_by_current_thread());
    mutex.unlock().unwrap();
}

#[test]
fn test_fair_mutex_admits_in_arrival_order() {
    const WAITERS: u64 = 4;

    let mutex = Arc::new(ReentrantMutex::with_fairness(Fairness::Fair));
    let (order_tx, order_rx) = crossbeam_channel::unbounded();

    mutex.lock().unwrap();

    // Spawn waiters one at a time, each confirmed queued before the
    // next arrives, pinning the arrival order.
    let mut handles = Vec::new();
    for id in 0..WAITERS {
        let waiter_mutex = Arc::clone(&mutex);
        let order_tx = order_tx.clone();
        let queued_before = mutex.queued_count();
        handles.push(thread::spawn(move || {
            waiter_mutex.lock().unwrap();
            order_tx.send(id).unwrap();
            waiter_mutex.unlock().unwrap();
        }));
        wait_until(|| mutex.queued_count() > queued_before);
    }

    mutex.unlock().unwrap();
    for handle in handles {
        handle.join().unwrap();
    }

    let admitted: Vec<u64> = order_rx.try_iter().collect();
    assert_eq!(admitted, (0..WAITERS).collect::<Vec<_>>());
}

#[test]
fn test_nonfair_mutex_makes_progress_under_contention() {
    const THREADS: usize = 6;
    let mutex = Arc::new(ReentrantMutex::new());
    let acquisitions = Arc::new(AtomicU64::new(0));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let mutex = Arc::clone(&mutex);
            let acquisitions = Arc::clone(&acquisitions);
            thread::spawn(move || {
                for _ in 0..200 {
                    mutex.lock().unwrap();
                    acquisitions.fetch_add(1, Ordering::Relaxed);
                    mutex.unlock().unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(acquisitions.load(Ordering::Relaxed), THREADS as u64 * 200);
}

#[test]
fn test_timed_acquire_expires_and_cleans_up() {
    let mutex = Arc::new(ReentrantMutex::new());
    mutex.lock().unwrap();

    let remote = Arc::clone(&mutex);
    let timed_out = thread::spawn(move || {
        !remote.try_lock_for(Duration::from_millis(40)).unwrap()
    })
    .join()
    .unwrap();
    assert!(timed_out);

    // The expired waiter's node must have been spliced out: no queue
    // residue, and the next acquirer is not blocked by a ghost.
    wait_until(|| mutex.queued_count() == 0);
    mutex.unlock().unwrap();

    let remote = Arc::clone(&mutex);
    let acquired = thread::spawn(move || {
        let got = remote.try_lock().unwrap();
        if got {
            remote.unlock().unwrap();
        }
        got
    })
    .join()
    .unwrap();
    assert!(acquired);
}

#[test]
fn test_timed_acquire_succeeds_before_deadline() {
    let mutex = Arc::new(ReentrantMutex::new());
    mutex.lock().unwrap();

    let remote = Arc::clone(&mutex);
    let handle = thread::spawn(move || {
        let got = remote.try_lock_for(Duration::from_secs(5)).unwrap();
        if got {
            remote.unlock().unwrap();
        }
        got
    });

    wait_until(|| mutex.queued_count() == 1);
    mutex.unlock().unwrap();
    assert!(handle.join().unwrap());
}
