//! # Lock-Free Wait Queue
//!
//! The FIFO of blocked threads contending for a synchronizer's state.
//!
//! ## Structure
//!
//! ```text
//!  head (sentinel,            tail
//!  no thread)                  │
//!   │                          ▼
//!   ▼   next ──►    next ──►
//!  [H] ◄─────── [A] ◄─────── [B]
//!        prev         prev
//! ```
//!
//! The head is always threadless: it stands for "whoever currently
//! owns the resource". A node's `prev` is written before the tail CAS
//! publishes it; its predecessor's `next` is written after. So `next`
//! may transiently lag, and every forward walk falls back to a
//! backward walk from `tail` when it hits a gap.
//!
//! ## The missed-wakeup handshake
//!
//! A thread parks only after its predecessor's status is `SIGNAL` -
//! a promise that the predecessor will unpark it on exit. Failing
//! that, it CASes the promise in and retries once more before
//! sleeping. Every wakeup is advisory: the woken thread re-validates
//! from scratch.

use crate::error::LockResult;
use crate::node::{
    AtomicNodeRef, NodeArena, NodeRef, NodeSlot, CANCELLED, CONDITION, RECLAIMED, SIGNAL,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use turnstile_core::{ThreadHandle, ThreadId};

/// Below this remaining budget a timed acquire spins instead of
/// parking; the park/unpark round trip would outlast the wait.
const SPIN_FOR_TIMEOUT_THRESHOLD: Duration = Duration::from_nanos(1000);

/// The shared wait queue: atomic `head`/`tail` over an arena of
/// pre-allocated nodes.
#[derive(Debug)]
pub(crate) struct WaitQueue {
    arena: NodeArena,
    head: AtomicNodeRef,
    tail: AtomicNodeRef,
}

impl WaitQueue {
    /// Creates a queue whose arena holds `capacity` node slots.
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            arena: NodeArena::new(capacity),
            head: AtomicNodeRef::none(),
            tail: AtomicNodeRef::none(),
        }
    }

    pub(crate) fn arena(&self) -> &NodeArena {
        &self.arena
    }

    /// Current head reference (sentinel), `NONE` before first use.
    pub(crate) fn head_ref(&self) -> NodeRef {
        self.head.load()
    }

    /// Allocates a node for the calling thread.
    pub(crate) fn new_waiter(
        &self,
        status: i32,
        waiter: Option<Arc<ThreadHandle>>,
    ) -> NodeRef {
        self.arena.alloc(status, waiter)
    }

    // -----------------------------------------------------------------
    // Enqueue
    // -----------------------------------------------------------------

    /// Appends `node` at the tail. Returns the predecessor it was
    /// linked behind.
    ///
    /// The queue is materialized lazily: the first enqueue installs a
    /// threadless sentinel head.
    pub(crate) fn enqueue(&self, node: NodeRef) -> NodeRef {
        loop {
            let tail = self.tail.load();
            if tail.is_none() {
                self.install_sentinel();
                continue;
            }
            // prev is linked before the tail CAS publishes the node.
            if let Some(slot) = self.arena.get(node) {
                slot.prev.store(tail);
            }
            if self.tail.compare_and_swap(tail, node) {
                // Completing the link; next lags prev from here until
                // this store lands.
                if let Some(old_tail) = self.arena.get(tail) {
                    old_tail.next.store(node);
                }
                tracing::trace!(node = node.index(), "enqueued waiter");
                return tail;
            }
        }
    }

    /// Installs the sentinel head and aliases tail to it. Loser of the
    /// head CAS retires its speculative sentinel and waits for the
    /// winner's tail store.
    fn install_sentinel(&self) {
        if self.head.load().is_none() {
            let sentinel = self.arena.alloc(0, None);
            if self.head.compare_and_swap(NodeRef::NONE, sentinel) {
                self.tail.store(sentinel);
                return;
            }
            self.arena.free(sentinel);
        }
        std::hint::spin_loop();
    }

    // -----------------------------------------------------------------
    // Admission loop
    // -----------------------------------------------------------------

    /// Runs the admission loop for an already-enqueued `node` owned by
    /// thread `me`.
    ///
    /// Each pass: if the predecessor is the head and `try_acquire`
    /// succeeds, promote and return `Ok(true)`. Otherwise arrange the
    /// `SIGNAL` handshake and park (bounded by `deadline` if given).
    /// Deadline expiry cancels the node and returns `Ok(false)`
    /// without ever re-running `try_acquire`. A hook fault cancels
    /// the node and propagates.
    pub(crate) fn acquire_queued(
        &self,
        node: NodeRef,
        me: &Arc<ThreadHandle>,
        deadline: Option<Instant>,
        mut try_acquire: impl FnMut() -> LockResult<bool>,
    ) -> LockResult<bool> {
        loop {
            let pred = match self.arena.get(node) {
                Some(slot) => slot.prev.load(),
                // Unreachable by protocol; re-deriving the predecessor
                // is always safe.
                None => continue,
            };
            if pred == self.head.load() {
                match try_acquire() {
                    Ok(true) => {
                        self.promote(node, pred);
                        return Ok(true);
                    }
                    Ok(false) => {}
                    Err(fault) => {
                        self.cancel(node);
                        return Err(fault);
                    }
                }
            }

            if let Some(deadline) = deadline {
                let now = Instant::now();
                if now >= deadline {
                    tracing::trace!(node = node.index(), "timed acquire expired");
                    self.cancel(node);
                    return Ok(false);
                }
                if self.should_park(pred, node) {
                    if deadline - now > SPIN_FOR_TIMEOUT_THRESHOLD {
                        me.token.park_until(deadline);
                    } else {
                        std::hint::spin_loop();
                    }
                }
            } else if self.should_park(pred, node) {
                me.token.park();
            }
        }
    }

    /// Decides whether the caller may park behind `pred`.
    ///
    /// `SIGNAL` on the predecessor is the wake promise; anything else
    /// means do one more loop: either we just planted the promise, or
    /// we skipped over cancelled predecessors and the picture changed.
    fn should_park(&self, pred: NodeRef, node: NodeRef) -> bool {
        let Some(pslot) = self.arena.get(pred) else {
            return false;
        };
        let ws = pslot.wait_status();
        if ws == SIGNAL {
            return true;
        }
        if ws > 0 {
            self.skip_cancelled_predecessors(node, pred, pslot);
            return false;
        }
        // 0 / CONDITION-cleared / PROPAGATE: plant the wake promise.
        pslot.cas_wait_status(ws, SIGNAL);
        false
    }

    /// Rewrites `node.prev` backward past cancelled predecessors,
    /// reclaiming each one it unlinks (this successor is the sole
    /// remaining owner of those slots), then repairs the forward link.
    fn skip_cancelled_predecessors(&self, node: NodeRef, mut pred: NodeRef, pslot: &NodeSlot) {
        let Some(nslot) = self.arena.get(node) else {
            return;
        };
        let mut cancelled = pslot;
        loop {
            let before = cancelled.prev.load();
            nslot.prev.store(before);
            if cancelled.cas_wait_status(CANCELLED, RECLAIMED) {
                self.arena.free(pred);
            }
            pred = before;
            match self.arena.get(pred) {
                Some(slot) if slot.wait_status() > 0 => cancelled = slot,
                Some(slot) => {
                    slot.next.store(node);
                    return;
                }
                None => return,
            }
        }
    }

    /// Promotes `node` to head after a successful acquire: drop its
    /// thread, detach it from the old head, publish it as the new
    /// sentinel, and retire the old head (ownership of which has just
    /// passed to this thread).
    fn promote(&self, node: NodeRef, old_head: NodeRef) {
        if let Some(slot) = self.arena.get(node) {
            slot.waiter.lock().take();
            slot.prev.store(NodeRef::NONE);
        }
        self.head.store(node);
        tracing::trace!(node = node.index(), "promoted to head");
        self.arena.free(old_head);
    }

    // -----------------------------------------------------------------
    // Cancellation
    // -----------------------------------------------------------------

    /// Marks `node` cancelled and splices it out of the queue.
    ///
    /// Never re-attempts the acquire hook. The splice runs the full
    /// algorithm: walk back over already-cancelled predecessors, then
    /// either retreat the tail, skip-link the predecessor over the
    /// node, or - when neither is safe - wake the successor so it can
    /// resynchronize against the chain itself.
    pub(crate) fn cancel(&self, node: NodeRef) {
        let Some(slot) = self.arena.get(node) else {
            return;
        };
        slot.waiter.lock().take();

        // Find the nearest live predecessor, dropping any cancelled
        // run in between.
        let mut pred = slot.prev.load();
        while let Some(pslot) = self.arena.get(pred) {
            if pslot.wait_status() <= 0 {
                break;
            }
            let before = pslot.prev.load();
            slot.prev.store(before);
            if pslot.cas_wait_status(CANCELLED, RECLAIMED) {
                self.arena.free(pred);
            }
            pred = before;
        }

        let pred_next = self
            .arena
            .get(pred)
            .map_or(NodeRef::NONE, |p| p.next.load());
        // Snapshot our forward link before publishing CANCELLED; after
        // that store the successor may reclaim this slot at any time.
        let successor = slot.next.load();

        slot.set_wait_status(CANCELLED);
        tracing::trace!(node = node.index(), "cancelled waiter");

        if node == self.tail.load() && self.tail.compare_and_swap(node, pred) {
            // We were the tail: retreat it and clear the dangling
            // forward link. The node is now unreachable; reclaim it
            // ourselves.
            if let Some(pslot) = self.arena.get(pred) {
                pslot.next.compare_and_swap(pred_next, NodeRef::NONE);
            }
            if slot.cas_wait_status(CANCELLED, RECLAIMED) {
                self.arena.free(node);
            }
            return;
        }

        // Mid-queue: if the predecessor is live, signalling, and not
        // the head, let it skip over us; otherwise wake our successor
        // to resynchronize. The slot itself is left for the successor
        // to reclaim.
        let mut spliced = false;
        if pred != self.head.load() {
            if let Some(pslot) = self.arena.get(pred) {
                let ws = pslot.wait_status();
                let signalling = ws == SIGNAL || (ws <= 0 && pslot.cas_wait_status(ws, SIGNAL));
                if signalling && pslot.waiter_id().is_some() {
                    if let Some(sslot) = self.arena.get(successor) {
                        if sslot.wait_status() <= 0 {
                            pslot.next.compare_and_swap(pred_next, successor);
                        }
                    }
                    spliced = true;
                }
            }
        }
        if !spliced {
            self.unpark_successor(node);
        }
    }

    // -----------------------------------------------------------------
    // Wakeup
    // -----------------------------------------------------------------

    /// Wakes the live successor of `node`, if any.
    ///
    /// The cheap forward read is resolved by a backward scan from the
    /// tail whenever `next` is missing or positively cancelled - the
    /// documented fallback for the next-lags-prev publication race.
    pub(crate) fn unpark_successor(&self, node: NodeRef) {
        let mut succ = self
            .arena
            .get(node)
            .map_or(NodeRef::NONE, |slot| slot.next.load());

        let unusable = match self.arena.get(succ) {
            Some(slot) => slot.wait_status() > 0,
            None => true,
        };
        if unusable {
            succ = self.rescan_from_tail(node);
        }

        if let Some(slot) = self.arena.get(succ) {
            if let Some(handle) = slot.waiter_handle() {
                tracing::trace!(thread = handle.id, "unparking successor");
                handle.token.unpark();
            }
        }
    }

    /// Backward scan from the tail for the live node closest to
    /// `stop` (exclusive).
    ///
    /// Hitting a recycled slot means a concurrent retirement raced the
    /// walk; the scan restarts from a freshly-read tail rather than
    /// giving up, or a parked waiter sitting between the recycled slot
    /// and `stop` would be skipped. Restarts converge: a claimer
    /// publishes the bypassing `prev` link before freeing a slot, so
    /// each retired node is off the fresh chain.
    fn rescan_from_tail(&self, stop: NodeRef) -> NodeRef {
        'scan: loop {
            let mut closest = NodeRef::NONE;
            let mut cursor = self.tail.load();
            while cursor.is_some() && cursor != stop {
                let Some(slot) = self.arena.get(cursor) else {
                    continue 'scan;
                };
                if slot.wait_status() <= 0 {
                    closest = cursor;
                }
                cursor = slot.prev.load();
            }
            return closest;
        }
    }

    // -----------------------------------------------------------------
    // Probes
    // -----------------------------------------------------------------

    /// Whether a thread other than `current` is queued ahead of any
    /// would-be new arrival (the fair policy's admission gate).
    ///
    /// The backward scan is a correctness fallback for the pointer
    /// publication race, not an optimization.
    pub(crate) fn has_queued_predecessors(&self, current: ThreadId) -> bool {
        let head = self.head.load();
        if head.is_none() {
            return false;
        }
        let mut first = self
            .arena
            .get(head)
            .map_or(NodeRef::NONE, |slot| slot.next.load());

        let unusable = match self.arena.get(first) {
            Some(slot) => slot.wait_status() > 0,
            None => true,
        };
        if unusable {
            // Record the closest-to-head live node seen from the tail.
            first = self.rescan_from_tail(head);
        }

        match self.arena.get(first) {
            None => false,
            // A threadless first node is mid-promotion: it is still an
            // earlier arrival than the caller.
            Some(slot) => slot.waiter_id() != Some(current),
        }
    }

    /// Number of live queued waiters (excludes the sentinel and any
    /// node mid-promotion). Diagnostic: the answer is stale as soon as
    /// it is produced.
    pub(crate) fn queued_count(&self) -> usize {
        let head = self.head.load();
        let mut count = 0;
        let mut cursor = self.tail.load();
        while cursor.is_some() && cursor != head {
            let Some(slot) = self.arena.get(cursor) else {
                break;
            };
            if slot.wait_status() <= 0 && slot.waiter_id().is_some() {
                count += 1;
            }
            cursor = slot.prev.load();
        }
        count
    }

    // -----------------------------------------------------------------
    // Condition transfer protocol
    // -----------------------------------------------------------------

    /// Whether a condition waiter's node has made it onto the sync
    /// queue.
    ///
    /// `CONDITION` status or an unset `prev` proves it has not; a set
    /// `next` proves it has; in between, only the backward scan from
    /// the tail can tell (the linking CAS may still be in flight).
    pub(crate) fn is_on_sync_queue(&self, node: NodeRef) -> bool {
        let Some(slot) = self.arena.get(node) else {
            // A recycled reference can only mean the node went through
            // the queue and out the far side.
            return true;
        };
        if slot.wait_status() == CONDITION || slot.prev.load().is_none() {
            return false;
        }
        if slot.next.load().is_some() {
            return true;
        }
        self.find_node_from_tail(node)
    }

    fn find_node_from_tail(&self, node: NodeRef) -> bool {
        let mut cursor = self.tail.load();
        loop {
            if cursor == node {
                return true;
            }
            let Some(slot) = self.arena.get(cursor) else {
                return false;
            };
            cursor = slot.prev.load();
        }
    }

    /// Moves a signalled condition waiter onto the sync queue.
    ///
    /// Returns `false` if the waiter had already cancelled (its
    /// `CONDITION` status is gone); the caller moves on to the next
    /// waiter. On success, if the new predecessor cannot carry the
    /// `SIGNAL` promise the waiter is woken directly as a safety net.
    pub(crate) fn transfer_for_signal(&self, node: NodeRef) -> bool {
        let Some(slot) = self.arena.get(node) else {
            return false;
        };
        if !slot.cas_wait_status(CONDITION, 0) {
            return false;
        }
        let pred = self.enqueue(node);
        tracing::trace!(node = node.index(), "transferred condition waiter");

        let mut wake_directly = true;
        if let Some(pslot) = self.arena.get(pred) {
            let ws = pslot.wait_status();
            if ws <= 0 && pslot.cas_wait_status(ws, SIGNAL) {
                wake_directly = false;
            }
        }
        if wake_directly {
            if let Some(handle) = slot.waiter_handle() {
                handle.token.unpark();
            }
        }
        true
    }

    /// Transfers a condition waiter whose timed wait expired.
    ///
    /// Returns `true` if the cancellation won (this thread claimed
    /// its own `CONDITION` status and enqueued itself); `false` if a
    /// racing signal's transfer landed first, in which case we spin
    /// until that transfer completes.
    pub(crate) fn transfer_after_cancelled_wait(&self, node: NodeRef) -> bool {
        if let Some(slot) = self.arena.get(node) {
            if slot.cas_wait_status(CONDITION, 0) {
                self.enqueue(node);
                return true;
            }
        }
        while !self.is_on_sync_queue(node) {
            std::thread::yield_now();
        }
        false
    }
}
