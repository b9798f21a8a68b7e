//! # Park Token
//!
//! Per-thread suspend/resume. A thread blocks in [`ParkToken::park`]
//! until a matching [`ParkToken::unpark`] or a deadline elapses.
//!
//! ## The Permit Latch
//!
//! ```text
//! unpark() ──► permit = true ──► park() consumes it, returns at once
//!
//! park()   ──► permit = false ──► sleep until unpark() or deadline
//! ```
//!
//! An `unpark` that arrives before the `park` is latched, never lost.
//! A second `unpark` while the permit is already latched is a no-op
//! (the permit never accumulates beyond one).

use parking_lot::{Condvar, Mutex};
use std::time::Instant;

/// A single-permit suspend/resume latch.
///
/// Wakeups are advisory: a parked thread may also return spuriously,
/// so every caller re-validates its wait condition in a loop.
#[derive(Debug, Default)]
pub struct ParkToken {
    permit: Mutex<bool>,
    wakeup: Condvar,
}

impl ParkToken {
    /// Creates a token with no latched permit.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks the calling thread until a permit is available, then
    /// consumes it.
    pub fn park(&self) {
        let mut permit = self.permit.lock();
        while !*permit {
            self.wakeup.wait(&mut permit);
        }
        *permit = false;
    }

    /// Blocks until a permit is available or `deadline` passes.
    ///
    /// Returns `true` if a permit was consumed, `false` on deadline
    /// expiry. Either way the caller re-validates its condition.
    pub fn park_until(&self, deadline: Instant) -> bool {
        let mut permit = self.permit.lock();
        while !*permit {
            if self.wakeup.wait_until(&mut permit, deadline).timed_out() {
                break;
            }
        }
        let consumed = *permit;
        *permit = false;
        consumed
    }

    /// Latches the wakeup permit and wakes the parked thread, if any.
    ///
    /// Idempotent: unparking an already-permitted token changes
    /// nothing.
    pub fn unpark(&self) {
        let mut permit = self.permit.lock();
        *permit = true;
        drop(permit);
        self.wakeup.notify_one();
    }

    /// Returns whether a permit is currently latched.
    ///
    /// Test/diagnostic probe only; the answer is stale the instant it
    /// is produced.
    #[must_use]
    pub fn has_permit(&self) -> bool {
        *self.permit.lock()
    }
}
