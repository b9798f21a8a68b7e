//! # Turnstile - Queue Synchronizer Framework
//!
//! A framework for building blocking synchronization primitives out of
//! three parts:
//!
//! - an atomic state word whose meaning belongs to the primitive,
//! - a lock-free FIFO wait queue with per-node wakeup handshakes,
//! - per-thread park/unpark suspension from [`turnstile_core`].
//!
//! A concrete primitive supplies only the non-blocking acquire/release
//! decision through [`SyncPolicy`]; the [`Synchronizer`] owns queuing,
//! parking, cancellation, and successor wakeup. [`ReentrantMutex`] is
//! the shipped consumer, with fair and nonfair acquisition policies
//! and [`Condition`] variables.
//!
//! ## Architecture
//!
//! ```text
//! ReentrantMutex ──► Synchronizer<HoldCountPolicy>
//!                         │
//!                    ┌────┴────┐
//!                    ▼         ▼
//!                SyncCore   WaitQueue ──► NodeArena (pre-allocated)
//!                 (state)      │
//!                              ▼
//!                    ParkToken (per thread)
//! ```
//!
//! ## Design Rules
//!
//! - No garbage collector: queue nodes come from a fixed arena and are
//!   recycled through generational references, so stale readers fail a
//!   generation check instead of touching freed memory.
//! - Waiting threads park; the queue never hands a lock off directly.
//!   A woken thread competes through the same `try_acquire` as
//!   everyone else.
//! - Contract violations (releasing a lock you do not own) are
//!   [`LockError`] faults; contention outcomes (timeout, failed
//!   `try_lock`) are ordinary `Ok` values.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]

pub mod condition;
pub mod error;
pub mod mutex;
pub mod node;
pub mod sync;

mod queue;

pub use condition::ConditionQueue;
pub use error::{LockError, LockResult};
pub use mutex::{Condition, Fairness, HoldCountPolicy, Lock, ReentrantMutex};
pub use node::{NodeRef, CANCELLED, CONDITION, PROPAGATE, SIGNAL};
pub use sync::{SyncCore, SyncPolicy, Synchronizer};
