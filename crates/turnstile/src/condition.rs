//! # Condition Queues
//!
//! A per-condition FIFO of waiters plus the transfer protocol that
//! moves a waiter onto the shared sync queue when signalled.
//!
//! ## The detour
//!
//! ```text
//! wait():    [condition queue] ── signal() transfers ──► [sync queue]
//!               park here                                reacquire here
//! ```
//!
//! Every operation requires the caller to hold the synchronizer
//! exclusively, which is also why the condition queue itself needs no
//! CAS protocol: additions and unlinks happen under that exclusivity.
//! Only the `status` word is raced, by the transfer CASes.

use crate::error::{LockError, LockResult};
use crate::node::{AtomicNodeRef, NodeRef, CONDITION};
use crate::sync::{SyncPolicy, Synchronizer};
use std::time::{Duration, Instant};
use turnstile_core::current_thread;

/// A FIFO of threads waiting on one condition of one synchronizer.
///
/// Create one per condition predicate; any number may share a single
/// synchronizer.
#[derive(Debug)]
pub struct ConditionQueue {
    first: AtomicNodeRef,
    last: AtomicNodeRef,
}

impl Default for ConditionQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl ConditionQueue {
    /// Creates an empty condition queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            first: AtomicNodeRef::none(),
            last: AtomicNodeRef::none(),
        }
    }

    /// Suspends the caller until signalled, releasing `sync` fully on
    /// entry and reacquiring it (restoring the saved hold state)
    /// before returning.
    ///
    /// Faults with [`LockError::NotOwner`] if the caller does not
    /// hold the synchronizer.
    pub fn wait<P: SyncPolicy>(&self, sync: &Synchronizer<P>) -> LockResult<()> {
        if !sync.core().is_held_by_current() {
            return Err(LockError::NotOwner);
        }
        let me = current_thread();
        let node = self.add_waiter(sync);
        let saved = sync.fully_release()?;

        while !sync.core().queue().is_on_sync_queue(node) {
            me.token.park();
            // Wakeup reason is never assumed; only the transfer ends
            // the wait.
        }
        sync.reacquire(node, saved, &me)
    }

    /// Bounded wait. Returns `Ok(true)` if signalled, `Ok(false)` if
    /// the timeout elapsed first. Either way the synchronizer is
    /// reacquired before returning.
    ///
    /// One deadline spans both phases: waiting to be transferred and
    /// the subsequent reacquisition's admission loop is entered
    /// regardless, since the caller must hold the lock on return.
    pub fn wait_for<P: SyncPolicy>(
        &self,
        sync: &Synchronizer<P>,
        timeout: Duration,
    ) -> LockResult<bool> {
        if !sync.core().is_held_by_current() {
            return Err(LockError::NotOwner);
        }
        let deadline = Instant::now() + timeout;
        let me = current_thread();
        let node = self.add_waiter(sync);
        let saved = sync.fully_release()?;

        let mut signalled = true;
        while !sync.core().queue().is_on_sync_queue(node) {
            if Instant::now() >= deadline {
                // Our cancellation races any in-flight signal; the
                // status CAS decides the winner.
                signalled = !sync.core().queue().transfer_after_cancelled_wait(node);
                break;
            }
            me.token.park_until(deadline);
        }
        sync.reacquire(node, saved, &me)?;
        if !signalled {
            // Holding the lock again: prune our stale link (and any
            // other non-CONDITION leftovers) from the condition FIFO.
            self.unlink_cancelled_waiters(sync);
        }
        Ok(signalled)
    }

    /// Wakes the longest-waiting thread, if any.
    ///
    /// Faults with [`LockError::NotOwner`] if the caller does not
    /// hold the synchronizer.
    pub fn signal<P: SyncPolicy>(&self, sync: &Synchronizer<P>) -> LockResult<()> {
        if !sync.core().is_held_by_current() {
            return Err(LockError::NotOwner);
        }
        self.do_signal(sync, false);
        Ok(())
    }

    /// Wakes every waiter, preserving FIFO order.
    pub fn signal_all<P: SyncPolicy>(&self, sync: &Synchronizer<P>) -> LockResult<()> {
        if !sync.core().is_held_by_current() {
            return Err(LockError::NotOwner);
        }
        self.do_signal(sync, true);
        Ok(())
    }

    /// Whether any thread is waiting on this condition. Requires the
    /// synchronizer to be held.
    pub fn has_waiters<P: SyncPolicy>(&self, sync: &Synchronizer<P>) -> LockResult<bool> {
        if !sync.core().is_held_by_current() {
            return Err(LockError::NotOwner);
        }
        let arena = sync.core().queue().arena();
        let mut cursor = self.first.load();
        while let Some(slot) = arena.get(cursor) {
            if slot.wait_status() == CONDITION {
                return Ok(true);
            }
            cursor = slot.next_waiter.load();
        }
        Ok(false)
    }

    /// Pops waiters off the FIFO until one transfer succeeds (or all
    /// waiters, for `signal_all`), skipping any that cancelled.
    fn do_signal<P: SyncPolicy>(&self, sync: &Synchronizer<P>, all: bool) {
        let queue = sync.core().queue();
        let arena = queue.arena();
        loop {
            let first = self.first.load();
            let Some(slot) = arena.get(first) else {
                // Empty (or a recycled straggler): reset both ends.
                self.first.store(NodeRef::NONE);
                self.last.store(NodeRef::NONE);
                return;
            };
            let next = slot.next_waiter.load();
            self.first.store(next);
            if next.is_none() {
                self.last.store(NodeRef::NONE);
            }
            slot.next_waiter.store(NodeRef::NONE);

            let transferred = queue.transfer_for_signal(first);
            if transferred {
                tracing::trace!(node = first.index(), "signalled condition waiter");
                if !all {
                    return;
                }
            }
            // Transfer refused: that waiter cancelled; move on so a
            // signal always reaches a real waiter or exhaustion.
        }
    }

    /// Appends the caller as a new `CONDITION` waiter. Runs under
    /// exclusivity, so the plain link writes need no CAS.
    fn add_waiter<P: SyncPolicy>(&self, sync: &Synchronizer<P>) -> NodeRef {
        let queue = sync.core().queue();
        let node = queue.new_waiter(CONDITION, Some(current_thread()));
        let last = self.last.load();
        match queue.arena().get(last) {
            Some(last_slot) => last_slot.next_waiter.store(node),
            None => self.first.store(node),
        }
        self.last.store(node);
        node
    }

    /// Drops every chain entry that is no longer a `CONDITION` waiter
    /// (timed-out waiters transfer themselves without unlinking, since
    /// they do not hold the lock at that moment). Runs under
    /// exclusivity.
    fn unlink_cancelled_waiters<P: SyncPolicy>(&self, sync: &Synchronizer<P>) {
        let arena = sync.core().queue().arena();
        let mut trail = NodeRef::NONE;
        let mut cursor = self.first.load();
        while cursor.is_some() {
            let (keep, next) = match arena.get(cursor) {
                Some(slot) => (slot.wait_status() == CONDITION, slot.next_waiter.load()),
                None => (false, NodeRef::NONE),
            };
            if keep {
                trail = cursor;
            } else {
                if let Some(slot) = arena.get(cursor) {
                    slot.next_waiter.store(NodeRef::NONE);
                }
                match arena.get(trail) {
                    Some(trail_slot) => trail_slot.next_waiter.store(next),
                    None => self.first.store(next),
                }
                if next.is_none() {
                    self.last.store(trail);
                }
            }
            cursor = next;
        }
    }
}
