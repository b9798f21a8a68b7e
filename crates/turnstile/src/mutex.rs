//! # Reentrant Mutex
//!
//! The framework's concrete consumer: a reentrant mutual-exclusion
//! lock with interchangeable fair/nonfair acquisition policies and
//! condition-variable support.
//!
//! ## State semantics
//!
//! ```text
//! state == 0      free
//! state == N > 0  held by `owner`, reentrancy depth N
//! ```
//!
//! ## Fairness
//!
//! - **Nonfair** (default): a newly arriving thread may barge ahead
//!   of queued waiters whenever it catches the lock free.
//! - **Fair**: a thread never takes a free slot while an earlier
//!   arrival is queued.
//!
//! [`ReentrantMutex::try_lock`] always uses the nonfair decision, on
//! purpose: a non-blocking probe optimizes for throughput and only
//! wins the instantaneous free-slot race, never a queued waiter's
//! eventual turn.

use crate::condition::ConditionQueue;
use crate::error::{LockError, LockResult};
use crate::sync::{SyncCore, SyncPolicy, Synchronizer};
use std::sync::Arc;
use std::time::Duration;
use turnstile_core::current_thread;

/// Default wait-queue capacity: the most threads that can be blocked
/// on one mutex (or its conditions) at once before new arrivals spin
/// for a slot.
const DEFAULT_MAX_WAITERS: usize = 64;

/// Acquisition ordering policy, chosen at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Fairness {
    /// Barging allowed; highest throughput, no ordering guarantee.
    #[default]
    Nonfair,
    /// Queued earlier arrivals are never overtaken on acquisition.
    Fair,
}

/// The minimal locking surface, as implemented by [`ReentrantMutex`].
pub trait Lock {
    /// Blocks until acquired. Reentrant.
    fn lock(&self) -> LockResult<()>;
    /// Releases one hold level. Faults if the caller is not the owner.
    fn unlock(&self) -> LockResult<()>;
    /// Non-blocking attempt; never queues.
    fn try_lock(&self) -> LockResult<bool>;
    /// Bounded blocking attempt. `Ok(false)` on timeout.
    fn try_lock_for(&self, timeout: Duration) -> LockResult<bool>;
}

/// The hold-count policy behind [`ReentrantMutex`].
#[derive(Debug)]
pub struct HoldCountPolicy {
    fairness: Fairness,
}

impl HoldCountPolicy {
    /// The barging decision: used by the nonfair policy everywhere
    /// and by `try_lock` regardless of configured fairness.
    pub fn try_acquire_nonfair(&self, core: &SyncCore, acquires: i64) -> LockResult<bool> {
        let me = current_thread().id;
        let state = core.state();
        if state == 0 {
            if core.cas_state(0, acquires) {
                core.set_owner(me);
                return Ok(true);
            }
            return Ok(false);
        }
        if core.owner() == me {
            return Self::bump_hold_count(core, state, acquires);
        }
        Ok(false)
    }

    fn try_acquire_fair(&self, core: &SyncCore, acquires: i64) -> LockResult<bool> {
        let me = current_thread().id;
        let state = core.state();
        if state == 0 {
            // Never jump ahead of an already-queued earlier arrival.
            if !core.has_queued_predecessors() && core.cas_state(0, acquires) {
                core.set_owner(me);
                return Ok(true);
            }
            return Ok(false);
        }
        if core.owner() == me {
            return Self::bump_hold_count(core, state, acquires);
        }
        Ok(false)
    }

    /// Reentrant re-acquire: no CAS needed, only the owner gets here.
    fn bump_hold_count(core: &SyncCore, state: i64, acquires: i64) -> LockResult<bool> {
        let next = state
            .checked_add(acquires)
            .filter(|n| *n > 0)
            .ok_or(LockError::HoldCountOverflow)?;
        core.set_state(next);
        Ok(true)
    }
}

impl SyncPolicy for HoldCountPolicy {
    fn try_acquire(&self, core: &SyncCore, acquires: i64) -> LockResult<bool> {
        match self.fairness {
            Fairness::Nonfair => self.try_acquire_nonfair(core, acquires),
            Fairness::Fair => self.try_acquire_fair(core, acquires),
        }
    }

    fn try_release(&self, core: &SyncCore, releases: i64) -> LockResult<bool> {
        if core.owner() != current_thread().id {
            return Err(LockError::NotOwner);
        }
        let remaining = core.state() - releases;
        let fully_free = remaining == 0;
        if fully_free {
            core.clear_owner();
        }
        // Safe plain write: we still hold exclusivity at this point.
        core.set_state(remaining);
        Ok(fully_free)
    }
}

/// A reentrant mutual-exclusion lock built on the queue synchronizer.
///
/// ## Usage
///
/// ```rust,ignore
/// let mutex = Arc::new(ReentrantMutex::new());
/// mutex.lock()?;
/// mutex.lock()?;   // reentrant
/// mutex.unlock()?;
/// mutex.unlock()?; // now free
/// ```
#[derive(Debug)]
pub struct ReentrantMutex {
    sync: Synchronizer<HoldCountPolicy>,
}

impl Default for ReentrantMutex {
    fn default() -> Self {
        Self::new()
    }
}

impl ReentrantMutex {
    /// Creates a nonfair mutex (the throughput-oriented default).
    #[must_use]
    pub fn new() -> Self {
        Self::with_fairness(Fairness::Nonfair)
    }

    /// Creates a mutex with the given acquisition policy.
    #[must_use]
    pub fn with_fairness(fairness: Fairness) -> Self {
        Self::with_capacity(fairness, DEFAULT_MAX_WAITERS)
    }

    /// Creates a mutex whose wait queue pre-allocates room for
    /// `max_waiters` simultaneously blocked threads.
    #[must_use]
    pub fn with_capacity(fairness: Fairness, max_waiters: usize) -> Self {
        Self {
            sync: Synchronizer::new(HoldCountPolicy { fairness }, max_waiters),
        }
    }

    /// The configured acquisition policy.
    #[must_use]
    pub fn fairness(&self) -> Fairness {
        self.sync.policy().fairness
    }

    /// Returns a fresh condition bound to this mutex. Any number of
    /// conditions may share one mutex.
    #[must_use]
    pub fn new_condition(self: &Arc<Self>) -> Condition {
        Condition {
            mutex: Arc::clone(self),
            waiters: ConditionQueue::new(),
        }
    }

    // -----------------------------------------------------------------
    // Introspection
    // -----------------------------------------------------------------

    /// Whether any thread currently holds the mutex.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.sync.core().state() != 0
    }

    /// Whether the calling thread is the owner.
    #[must_use]
    pub fn is_held_by_current_thread(&self) -> bool {
        self.sync.core().is_held_by_current()
    }

    /// The calling thread's reentrancy depth, 0 if it is not the
    /// owner.
    #[must_use]
    pub fn hold_count(&self) -> i64 {
        if self.is_held_by_current_thread() {
            self.sync.core().state()
        } else {
            0
        }
    }

    /// Whether any thread is queued waiting to acquire. Diagnostic;
    /// stale the moment it returns.
    #[must_use]
    pub fn has_queued_threads(&self) -> bool {
        self.queued_count() > 0
    }

    /// Number of threads queued waiting to acquire.
    #[must_use]
    pub fn queued_count(&self) -> usize {
        self.sync.core().queued_count()
    }
}

impl Lock for ReentrantMutex {
    fn lock(&self) -> LockResult<()> {
        self.sync.acquire(1)
    }

    fn unlock(&self) -> LockResult<()> {
        self.sync.release(1).map(|_| ())
    }

    fn try_lock(&self) -> LockResult<bool> {
        // Deliberately nonfair whatever the configured policy.
        self.sync
            .policy()
            .try_acquire_nonfair(self.sync.core(), 1)
    }

    fn try_lock_for(&self, timeout: Duration) -> LockResult<bool> {
        self.sync.try_acquire_for(1, timeout)
    }
}

/// A condition variable bound to one [`ReentrantMutex`].
///
/// Every method faults with [`LockError::NotOwner`] unless the
/// calling thread holds the mutex.
#[derive(Debug)]
pub struct Condition {
    mutex: Arc<ReentrantMutex>,
    waiters: ConditionQueue,
}

impl Condition {
    /// Suspends until signalled; the mutex is fully released while
    /// waiting and reacquired (at the prior hold count) before this
    /// returns. Always re-check the predicate in a loop.
    pub fn wait(&self) -> LockResult<()> {
        self.waiters.wait(&self.mutex.sync)
    }

    /// Bounded wait. `Ok(false)` means the timeout elapsed before a
    /// signal; the mutex is reacquired either way.
    pub fn wait_for(&self, timeout: Duration) -> LockResult<bool> {
        self.waiters.wait_for(&self.mutex.sync, timeout)
    }

    /// Wakes the longest-waiting thread, if any.
    pub fn signal(&self) -> LockResult<()> {
        self.waiters.signal(&self.mutex.sync)
    }

    /// Wakes all waiting threads in FIFO order.
    pub fn signal_all(&self) -> LockResult<()> {
        self.waiters.signal_all(&self.mutex.sync)
    }

    /// Whether any thread is waiting on this condition.
    pub fn has_waiters(&self) -> LockResult<bool> {
        self.waiters.has_waiters(&self.mutex.sync)
    }

    /// The mutex this condition is bound to.
    #[must_use]
    pub fn mutex(&self) -> &Arc<ReentrantMutex> {
        &self.mutex
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_is_reentrant() {
        let mutex = ReentrantMutex::new();
        mutex.lock().unwrap();
        mutex.lock().unwrap();
        mutex.lock().unwrap();
        assert_eq!(mutex.hold_count(), 3);

        mutex.unlock().unwrap();
        mutex.unlock().unwrap();
        assert!(mutex.is_locked());
        mutex.unlock().unwrap();
        assert!(!mutex.is_locked());
        assert_eq!(mutex.hold_count(), 0);
    }

    #[test]
    fn test_unlock_without_hold_faults() {
        let mutex = ReentrantMutex::new();
        assert_eq!(mutex.unlock(), Err(LockError::NotOwner));

        mutex.lock().unwrap();
        mutex.unlock().unwrap();
        // One extra unlock after full release is the same fault.
        assert_eq!(mutex.unlock(), Err(LockError::NotOwner));
    }

    #[test]
    fn test_try_lock_uncontended() {
        let mutex = ReentrantMutex::new();
        assert!(mutex.try_lock().unwrap());
        assert!(mutex.try_lock().unwrap()); // reentrant probe
        assert_eq!(mutex.hold_count(), 2);
        mutex.unlock().unwrap();
        mutex.unlock().unwrap();
    }

    #[test]
    fn test_try_lock_fails_when_held_elsewhere() {
        let mutex = Arc::new(ReentrantMutex::new());
        mutex.lock().unwrap();

        let remote = Arc::clone(&mutex);
        let got = std::thread::spawn(move || remote.try_lock().unwrap())
            .join()
            .unwrap();
        assert!(!got);
        mutex.unlock().unwrap();
    }

    #[test]
    fn test_try_lock_for_times_out() {
        let mutex = Arc::new(ReentrantMutex::new());
        mutex.lock().unwrap();

        let remote = Arc::clone(&mutex);
        let got = std::thread::spawn(move || {
            remote.try_lock_for(Duration::from_millis(30)).unwrap()
        })
        .join()
        .unwrap();
        assert!(!got); // timeout is an outcome, not a fault
        mutex.unlock().unwrap();
    }

    #[test]
    fn test_condition_requires_ownership() {
        let mutex = Arc::new(ReentrantMutex::new());
        let cond = mutex.new_condition();
        assert_eq!(cond.signal(), Err(LockError::NotOwner));
        assert_eq!(cond.signal_all(), Err(LockError::NotOwner));
        assert_eq!(cond.wait(), Err(LockError::NotOwner));
    }

    #[test]
    fn test_signal_with_no_waiters_is_noop() {
        let mutex = Arc::new(ReentrantMutex::new());
        let cond = mutex.new_condition();
        mutex.lock().unwrap();
        assert!(!cond.has_waiters().unwrap());
        cond.signal().unwrap();
        cond.signal_all().unwrap();
        mutex.unlock().unwrap();
    }

    #[test]
    fn test_try_lock_barges_past_fair_queue() {
        use turnstile_core::{ParkToken, ThreadHandle};

        let mutex = ReentrantMutex::with_fairness(Fairness::Fair);
        // Plant a queued waiter belonging to a fabricated other thread.
        let queue = mutex.sync.core().queue();
        let stranger = Arc::new(ThreadHandle {
            id: u64::MAX,
            token: ParkToken::new(),
        });
        let node = queue.new_waiter(0, Some(stranger));
        queue.enqueue(node);

        // The fair acquire path must defer to the queued stranger...
        let policy = mutex.sync.policy();
        assert!(!policy.try_acquire(mutex.sync.core(), 1).unwrap());
        // ...but try_lock barges, by contract.
        assert!(mutex.try_lock().unwrap());
        mutex.unlock().unwrap();
    }

    #[test]
    fn test_fairness_is_recorded() {
        let fair = ReentrantMutex::with_fairness(Fairness::Fair);
        assert_eq!(fair.fairness(), Fairness::Fair);
        assert_eq!(ReentrantMutex::new().fairness(), Fairness::Nonfair);
    }
}
