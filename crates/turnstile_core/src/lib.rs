//! # Turnstile Core
//!
//! Leaf primitives for the turnstile queue synchronizer:
//!
//! - [`AtomicCell`]: the single atomically-managed state word
//! - [`ParkToken`]: per-thread suspend/resume with a latched permit
//! - [`ThreadHandle`] / [`current_thread`]: process-unique thread
//!   identities paired with each thread's park token
//!
//! ## Design Rules
//!
//! 1. **No blocking except inside `park`** - everything else is a
//!    bounded sequence of atomic operations
//! 2. **A wakeup permit is never lost** - `unpark` before `park`
//!    latches, `park` consumes
//! 3. **Identity is a plain integer** - owner checks and fairness
//!    probes compare `u64` ids, never OS thread handles

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

mod cell;
mod park;
mod thread;

pub use cell::AtomicCell;
pub use park::ParkToken;
pub use thread::{current_thread, ThreadHandle, ThreadId};
