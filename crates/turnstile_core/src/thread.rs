//! # Thread Identity Registry
//!
//! Assigns every thread a process-unique non-zero `u64` id and a
//! shared [`ParkToken`], bundled as a [`ThreadHandle`].
//!
//! Owner checks, reentrancy detection, and the fairness probe all
//! compare these plain ids. The handle is `Arc`-shared so a waker can
//! keep a waiter's token alive across the suspend/resume race.

use crate::park::ParkToken;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Process-unique thread identity. Zero is reserved for "no thread".
pub type ThreadId = u64;

/// A thread's identity plus its park token.
#[derive(Debug)]
pub struct ThreadHandle {
    /// Process-unique, non-zero id.
    pub id: ThreadId,
    /// The thread's suspend/resume latch.
    pub token: ParkToken,
}

/// Monotonic id source. Starts at 1 so that 0 means "none".
static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CURRENT: Arc<ThreadHandle> = Arc::new(ThreadHandle {
        id: NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed),
        token: ParkToken::new(),
    });
}

/// Returns the calling thread's shared handle.
///
/// The first call on a thread registers it; later calls are a cheap
/// thread-local clone.
#[must_use]
pub fn current_thread() -> Arc<ThreadHandle> {
    CURRENT.with(Arc::clone)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_is_stable_within_thread() {
        let a = current_thread();
        let b = current_thread();
        assert_eq!(a.id, b.id);
        assert!(a.id != 0);
    }

    #[test]
    fn test_ids_differ_across_threads() {
        let mine = current_thread().id;
        let theirs = std::thread::spawn(|| current_thread().id)
            .join()
            .unwrap();
        assert_ne!(mine, theirs);
    }
}
