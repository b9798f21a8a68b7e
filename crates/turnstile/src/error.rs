//! # Synchronizer Error Types
//!
//! Contract faults surfaced by the framework. A timeout is never an
//! error: bounded acquires report "not acquired" through their normal
//! return value.

use thiserror::Error;

/// Caller-misuse faults. These are returned synchronously to the
/// immediate caller; nothing retries or swallows them.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockError {
    /// A release or condition operation was attempted by a thread
    /// that does not hold the lock exclusively.
    #[error("current thread is not the exclusive owner")]
    NotOwner,

    /// A reentrant acquire pushed the hold count past its maximum.
    #[error("reentrant hold count overflow")]
    HoldCountOverflow,
}

/// Result type for synchronizer operations.
pub type LockResult<T> = Result<T, LockError>;
