//! # Wait-Queue Nodes
//!
//! Pre-allocated node slots with generational references.
//!
//! ## Why an arena
//!
//! The wait queue is lock-free: `head`, `tail`, and the per-node links
//! are mutated only by CAS. Without garbage collection, recycling a
//! node while another thread still holds a pointer to it would turn
//! every CAS loop into an ABA trap. Instead of raw pointers, every
//! link is a packed reference:
//!
//! ```text
//! 63            32 31             0
//! ┌───────────────┬───────────────┐
//! │  generation   │   slot index  │
//! └───────────────┴───────────────┘
//! ```
//!
//! Freeing a slot bumps its generation, so a stale reference simply
//! stops resolving; a CAS against a recycled slot fails on the
//! generation bits. Readers that lose the race fall back to a
//! re-scan, never to undefined behavior.
//!
//! ## Disjoint queue membership
//!
//! `prev`/`next` are sync-queue links; `next_waiter` is the
//! condition-queue link. A node is never an active member of both
//! queues: the condition transfer clears its `CONDITION` status
//! before the sync-queue enqueue publishes it.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicI32, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use turnstile_core::ThreadHandle;

/// Node is cancelled (timeout or abandonment). Terminal.
pub const CANCELLED: i32 = 1;
/// The node's successor is (or will be) parked and must be woken when
/// this node exits the queue.
pub const SIGNAL: i32 = -1;
/// The node currently lives only in a condition queue.
pub const CONDITION: i32 = -2;
/// Reserved for shared-mode wakeup propagation. Declared for protocol
/// completeness; the exclusive-only primitives here never set it.
pub const PROPAGATE: i32 = -3;

/// Cancelled node claimed for recycling. Internal successor-to-arena
/// handshake; guarantees a single freer.
pub(crate) const RECLAIMED: i32 = 2;

/// A packed generational reference to an arena slot.
///
/// `NodeRef::NONE` plays the role of a null pointer.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub struct NodeRef(u64);

impl NodeRef {
    /// The absent reference.
    pub const NONE: NodeRef = NodeRef(u64::MAX);

    /// Packs a slot index and generation.
    #[must_use]
    pub(crate) fn new(index: u32, generation: u32) -> Self {
        Self((u64::from(generation) << 32) | u64::from(index))
    }

    /// Slot index half of the reference.
    #[inline]
    #[must_use]
    pub fn index(self) -> u32 {
        (self.0 & 0xFFFF_FFFF) as u32
    }

    /// Generation half of the reference.
    #[inline]
    #[must_use]
    pub fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// Whether this is the absent reference.
    #[inline]
    #[must_use]
    pub fn is_none(self) -> bool {
        self == Self::NONE
    }

    /// Whether this refers to a slot (possibly a stale generation).
    #[inline]
    #[must_use]
    pub fn is_some(self) -> bool {
        self != Self::NONE
    }
}

/// An atomic cell holding a [`NodeRef`].
#[derive(Debug)]
pub(crate) struct AtomicNodeRef {
    bits: AtomicU64,
}

impl AtomicNodeRef {
    pub(crate) const fn none() -> Self {
        Self {
            bits: AtomicU64::new(u64::MAX),
        }
    }

    #[inline]
    pub(crate) fn load(&self) -> NodeRef {
        NodeRef(self.bits.load(Ordering::Acquire))
    }

    #[inline]
    pub(crate) fn store(&self, r: NodeRef) {
        self.bits.store(r.0, Ordering::Release);
    }

    /// CAS on the full packed value; a recycled slot's bumped
    /// generation makes stale expectations fail.
    #[inline]
    pub(crate) fn compare_and_swap(&self, expect: NodeRef, update: NodeRef) -> bool {
        self.bits
            .compare_exchange(expect.0, update.0, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// One wait-queue entry.
///
/// The slot outlives any single waiter; `gen` decides which life a
/// given [`NodeRef`] belongs to.
#[derive(Debug)]
pub(crate) struct NodeSlot {
    /// Current generation. Bumped on free; compared by `NodeArena::get`.
    pub(crate) gen: AtomicU32,
    /// Sync-queue backward link. Set before the tail CAS publishes the
    /// node, so it never lags.
    pub(crate) prev: AtomicNodeRef,
    /// Sync-queue forward link. Set after the tail CAS, so it may
    /// transiently lag `prev`; forward walks must tolerate that.
    pub(crate) next: AtomicNodeRef,
    /// Condition-queue link. Disjoint lifetime from `prev`/`next`.
    pub(crate) next_waiter: AtomicNodeRef,
    /// Wait status: `CANCELLED`, `SIGNAL`, `CONDITION`, `PROPAGATE`,
    /// or 0 (default).
    pub(crate) status: AtomicI32,
    /// The blocked thread, or `None` for the sentinel head and for a
    /// node being promoted to head.
    pub(crate) waiter: Mutex<Option<Arc<ThreadHandle>>>,
}

impl NodeSlot {
    fn empty() -> Self {
        Self {
            gen: AtomicU32::new(0),
            prev: AtomicNodeRef::none(),
            next: AtomicNodeRef::none(),
            next_waiter: AtomicNodeRef::none(),
            status: AtomicI32::new(0),
            waiter: Mutex::new(None),
        }
    }

    #[inline]
    pub(crate) fn wait_status(&self) -> i32 {
        self.status.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn set_wait_status(&self, ws: i32) {
        self.status.store(ws, Ordering::Release);
    }

    #[inline]
    pub(crate) fn cas_wait_status(&self, expect: i32, update: i32) -> bool {
        self.status
            .compare_exchange(expect, update, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Clones the waiter handle, if any.
    pub(crate) fn waiter_handle(&self) -> Option<Arc<ThreadHandle>> {
        self.waiter.lock().clone()
    }

    /// The waiter's thread id, if a waiter is attached.
    pub(crate) fn waiter_id(&self) -> Option<u64> {
        self.waiter.lock().as_ref().map(|h| h.id)
    }
}

/// Fixed-capacity slot arena. All node memory is allocated up front;
/// enqueue/dequeue never touch the heap.
#[derive(Debug)]
pub(crate) struct NodeArena {
    slots: Box<[NodeSlot]>,
    /// Indices of unallocated slots. Taken only on the contended slow
    /// path, so a plain lock here never sits on the fast path.
    free: Mutex<Vec<u32>>,
}

impl NodeArena {
    /// Creates an arena with `capacity` pre-allocated slots.
    pub(crate) fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "node arena capacity must be non-zero");
        assert!(
            u32::try_from(capacity).is_ok() && capacity < u32::MAX as usize,
            "node arena capacity must fit in a u32 index"
        );
        let slots: Vec<NodeSlot> = (0..capacity).map(|_| NodeSlot::empty()).collect();
        let free: Vec<u32> = (0..capacity as u32).rev().collect();
        Self {
            slots: slots.into_boxed_slice(),
            free: Mutex::new(free),
        }
    }

    /// Allocates a slot in its current generation.
    ///
    /// When every slot is held by a live waiter the caller yields and
    /// retries: a waiter ahead of it must retire a node before it can
    /// join the queue. Admission degrades to spinning rather than
    /// failing.
    pub(crate) fn alloc(&self, status: i32, waiter: Option<Arc<ThreadHandle>>) -> NodeRef {
        loop {
            let index = self.free.lock().pop();
            if let Some(index) = index {
                let slot = &self.slots[index as usize];
                let generation = slot.gen.load(Ordering::Acquire);
                slot.prev.store(NodeRef::NONE);
                slot.next.store(NodeRef::NONE);
                slot.next_waiter.store(NodeRef::NONE);
                slot.set_wait_status(status);
                *slot.waiter.lock() = waiter;
                return NodeRef::new(index, generation);
            }
            tracing::trace!("node arena exhausted, yielding");
            std::thread::yield_now();
        }
    }

    /// Resolves a reference to its slot, or `None` if the slot has
    /// since been recycled (the reference's generation is stale).
    #[inline]
    pub(crate) fn get(&self, r: NodeRef) -> Option<&NodeSlot> {
        if r.is_none() {
            return None;
        }
        let slot = self.slots.get(r.index() as usize)?;
        (slot.gen.load(Ordering::Acquire) == r.generation()).then_some(slot)
    }

    /// Retires a slot: bumps the generation (invalidating every
    /// outstanding reference), clears the fields, and returns the
    /// index to the free list.
    ///
    /// The generation CAS makes a double free a silent no-op; callers
    /// still guarantee single ownership (promotion owns the old head,
    /// the `CANCELLED` to `RECLAIMED` status CAS elects one freer for
    /// a cancelled node).
    pub(crate) fn free(&self, r: NodeRef) {
        let Some(slot) = self.slots.get(r.index() as usize) else {
            return;
        };
        let next_gen = r.generation().wrapping_add(1);
        if slot
            .gen
            .compare_exchange(r.generation(), next_gen, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            slot.waiter.lock().take();
            slot.prev.store(NodeRef::NONE);
            slot.next.store(NodeRef::NONE);
            slot.next_waiter.store(NodeRef::NONE);
            slot.set_wait_status(0);
            self.free.lock().push(r.index());
        }
    }
}
