//! Error types for mutex operations.

use shardlock_store::StoreError;
use thiserror::Error;

/// Errors that can occur during mutex operations.
///
/// Contention is not an error: the primitives answer `false` when another
/// holder is active. Only scoped acquisition turns a refused lock into
/// [`MutexError::NotAcquired`].
#[derive(Debug, Error)]
pub enum MutexError {
    /// The lock name is empty.
    #[error("lock name must not be empty")]
    InvalidName,

    /// The holder identity is empty or is the reserved sentinel.
    #[error("invalid holder: {0:?}")]
    InvalidHolder(String),

    /// The lease duration is zero or does not fit in milliseconds.
    #[error("lease duration must be positive, got {0:?}")]
    InvalidLease(std::time::Duration),

    /// Scoped acquisition found the lock held by someone else.
    #[error("lock not acquired: {name}")]
    NotAcquired { name: String },

    /// A lock row exists but cannot be decoded.
    #[error("corrupt lock record {name}: {reason}")]
    CorruptRecord { name: String, reason: String },

    /// The underlying item store failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Convenience type alias for mutex operations.
pub type MutexResult<T> = std::result::Result<T, MutexError>;
