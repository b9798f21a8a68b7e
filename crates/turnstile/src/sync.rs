//! # Synchronizer Framework
//!
//! The generic core that turns one atomic state word plus the wait
//! queue into a blocking primitive. Concrete primitives supply only
//! the acquire/release decision policy; the core owns queuing,
//! suspension, and wakeup.
//!
//! ## Control flow
//!
//! ```text
//! acquire(arg) ──► policy.try_acquire ──ok──► return (fast path)
//!                        │fail
//!                        ▼
//!                  enqueue(node) ──► admission loop ──► park/retry
//!
//! release(arg) ──► policy.try_release ──fully free──► wake successor
//! ```
//!
//! The core never interprets `state` or `arg`; their meaning belongs
//! entirely to the policy.

use crate::error::{LockError, LockResult};
use crate::node::NodeRef;
use crate::queue::WaitQueue;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use turnstile_core::{current_thread, AtomicCell, ThreadHandle, ThreadId};

/// The acquire/release decision hooks a concrete primitive supplies.
///
/// Both hooks must be non-blocking and must leave state and ownership
/// untouched on failure. Because this is a trait rather than an
/// overridable base, an unimplemented hook is a compile error, not a
/// runtime fault.
pub trait SyncPolicy: Send + Sync {
    /// Attempts to acquire. `Ok(true)` commits the acquisition (state
    /// and owner updated); `Ok(false)` leaves everything unchanged.
    /// `Err` is a contract fault (e.g. hold-count overflow).
    fn try_acquire(&self, core: &SyncCore, arg: i64) -> LockResult<bool>;

    /// Attempts to release. `Ok(true)` means the resource is now
    /// fully free; `Ok(false)` means a partial release (e.g. one
    /// reentrancy level). `Err` is a contract fault.
    fn try_release(&self, core: &SyncCore, arg: i64) -> LockResult<bool>;
}

/// The state a policy decides over: the atomic state word, the
/// exclusive owner, and the wait queue it may probe for fairness.
#[derive(Debug)]
pub struct SyncCore {
    state: AtomicCell,
    /// Exclusive owner's thread id, 0 when unowned.
    owner: AtomicU64,
    queue: WaitQueue,
}

impl SyncCore {
    fn new(max_waiters: usize) -> Self {
        Self {
            state: AtomicCell::new(0),
            owner: AtomicU64::new(0),
            queue: WaitQueue::new(max_waiters),
        }
    }

    /// Current synchronizer state (policy-defined meaning).
    #[inline]
    #[must_use]
    pub fn state(&self) -> i64 {
        self.state.get()
    }

    /// Writes the state. Only valid where the caller already holds
    /// exclusivity (e.g. a reentrant re-acquire or a release commit).
    #[inline]
    pub fn set_state(&self, new: i64) {
        self.state.set(new);
    }

    /// Atomically transitions the state from `expect` to `update`.
    #[inline]
    pub fn cas_state(&self, expect: i64, update: i64) -> bool {
        self.state.compare_and_swap(expect, update)
    }

    /// Exclusive owner's thread id, 0 when unowned.
    #[inline]
    #[must_use]
    pub fn owner(&self) -> ThreadId {
        self.owner.load(Ordering::Acquire)
    }

    /// Records the exclusive owner. Called by a policy after winning
    /// the acquisition CAS.
    #[inline]
    pub fn set_owner(&self, id: ThreadId) {
        self.owner.store(id, Ordering::Release);
    }

    /// Clears the exclusive owner. Called by a policy before the
    /// state write that publishes "fully free".
    #[inline]
    pub fn clear_owner(&self) {
        self.owner.store(0, Ordering::Release);
    }

    /// Whether the calling thread is the exclusive owner.
    #[must_use]
    pub fn is_held_by_current(&self) -> bool {
        self.owner() == current_thread().id
    }

    /// Whether an earlier arrival is queued ahead of the caller. The
    /// fair policy consults this before taking a free slot.
    #[must_use]
    pub fn has_queued_predecessors(&self) -> bool {
        self.queue.has_queued_predecessors(current_thread().id)
    }

    /// Number of threads currently queued for acquisition.
    /// Diagnostic; stale the moment it returns.
    #[must_use]
    pub fn queued_count(&self) -> usize {
        self.queue.queued_count()
    }

    pub(crate) fn queue(&self) -> &WaitQueue {
        &self.queue
    }
}

/// A synchronizer: a [`SyncCore`] driven by a [`SyncPolicy`].
#[derive(Debug)]
pub struct Synchronizer<P: SyncPolicy> {
    core: SyncCore,
    policy: P,
}

impl<P: SyncPolicy> Synchronizer<P> {
    /// Creates a synchronizer whose wait queue pre-allocates
    /// `max_waiters` node slots.
    #[must_use]
    pub fn new(policy: P, max_waiters: usize) -> Self {
        Self {
            core: SyncCore::new(max_waiters),
            policy,
        }
    }

    /// The policy-visible state.
    #[must_use]
    pub fn core(&self) -> &SyncCore {
        &self.core
    }

    /// The decision policy.
    #[must_use]
    pub fn policy(&self) -> &P {
        &self.policy
    }

    /// Acquires, blocking until successful.
    ///
    /// Fast path: one `try_acquire` with no queuing. Contended path:
    /// enqueue and run the admission loop until promoted to head.
    pub fn acquire(&self, arg: i64) -> LockResult<()> {
        if self.policy.try_acquire(&self.core, arg)? {
            return Ok(());
        }
        let me = current_thread();
        let node = self
            .core
            .queue
            .new_waiter(0, Some(Arc::clone(&me)));
        self.core.queue.enqueue(node);
        let acquired = self.core.queue.acquire_queued(node, &me, None, || {
            self.policy.try_acquire(&self.core, arg)
        })?;
        debug_assert!(acquired, "untimed admission loop cannot time out");
        Ok(())
    }

    /// Bounded acquire. Returns `Ok(false)` on deadline expiry - a
    /// normal outcome, not a fault.
    pub fn try_acquire_for(&self, arg: i64, timeout: Duration) -> LockResult<bool> {
        if self.policy.try_acquire(&self.core, arg)? {
            return Ok(true);
        }
        if timeout.is_zero() {
            return Ok(false);
        }
        let deadline = Instant::now() + timeout;
        let me = current_thread();
        let node = self
            .core
            .queue
            .new_waiter(0, Some(Arc::clone(&me)));
        self.core.queue.enqueue(node);
        self.core.queue.acquire_queued(node, &me, Some(deadline), || {
            self.policy.try_acquire(&self.core, arg)
        })
    }

    /// Releases. When the policy reports "fully free", wakes the head
    /// successor so it may compete again - the lock is never handed
    /// off directly.
    pub fn release(&self, arg: i64) -> LockResult<bool> {
        if self.policy.try_release(&self.core, arg)? {
            let head = self.core.queue.head_ref();
            if head.is_some() {
                self.core.queue.unpark_successor(head);
            }
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Releases the full saved state in one step (the condition-wait
    /// entry move). Returns the state value to restore on reacquire.
    pub(crate) fn fully_release(&self) -> LockResult<i64> {
        let saved = self.core.state();
        if self.release(saved)? {
            Ok(saved)
        } else {
            Err(LockError::NotOwner)
        }
    }

    /// Reruns the admission loop for a node already on the sync queue
    /// (a transferred condition waiter), restoring `saved` state
    /// atomically with reacquisition.
    pub(crate) fn reacquire(
        &self,
        node: NodeRef,
        saved: i64,
        me: &Arc<ThreadHandle>,
    ) -> LockResult<()> {
        let acquired = self.core.queue.acquire_queued(node, me, None, || {
            self.policy.try_acquire(&self.core, saved)
        })?;
        debug_assert!(acquired, "untimed admission loop cannot time out");
        Ok(())
    }
}
