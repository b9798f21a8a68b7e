//! # Atomic State Cell
//!
//! The one arbitrated integer every synchronizer is built around.
//! The cell never interprets its value; meaning belongs entirely to
//! the policy that owns it (hold count, permit count, latch flag).

use std::sync::atomic::{AtomicI64, Ordering};

/// A thin wrapper over an atomic `i64` with acquire/release ordering
/// at every publish/consume point.
///
/// # Example
///
/// ```rust,ignore
/// let state = AtomicCell::new(0);
/// if state.compare_and_swap(0, 1) {
///     // exclusive section
///     state.set(0);
/// }
/// ```
#[derive(Debug)]
pub struct AtomicCell {
    value: AtomicI64,
}

impl AtomicCell {
    /// Creates a cell holding `initial`.
    #[must_use]
    pub const fn new(initial: i64) -> Self {
        Self {
            value: AtomicI64::new(initial),
        }
    }

    /// Reads the current value (acquire).
    #[inline]
    #[must_use]
    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Acquire)
    }

    /// Writes a new value (release).
    ///
    /// Only valid where the caller already holds exclusivity over the
    /// cell (e.g. committing a release while still the owner).
    #[inline]
    pub fn set(&self, new: i64) {
        self.value.store(new, Ordering::Release);
    }

    /// Atomically replaces `expect` with `update`.
    ///
    /// Returns `true` on success. Failure means another thread won
    /// the race; the caller re-reads and decides again.
    #[inline]
    pub fn compare_and_swap(&self, expect: i64, update: i64) -> bool {
        self.value
            .compare_exchange(expect, update, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}
