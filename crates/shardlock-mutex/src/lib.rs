//! Lease-based distributed mutex.
//!
//! A lock is a single row in a conditional-write item store. Acquiring writes
//! the caller as holder with an absolute expiry, but only if the row is
//! absent or holds the empty sentinel. Releasing writes the sentinel back,
//! but only if the caller is still the holder. A holder that crashes simply
//! stops renewing: once its expiry passes, the next [`LeaseMutex::lock`]
//! prunes the row and takes over.
//!
//! # State machine
//!
//! ```text
//! Unlocked ── lock() ──→ Locked(holder) ── release() / lease expiry ──→ Unlocked
//! ```
//!
//! # Modules
//!
//! - [`error`]: Error types for mutex operations
//! - [`record`]: [`LockRecord`] and its row encoding
//! - [`table`]: [`MutexTable`], the conditional-write primitives
//! - [`mutex`]: [`LeaseMutex`] and the scoped [`LeaseGuard`]

pub mod error;
pub mod mutex;
pub mod record;
pub mod table;

pub use error::{MutexError, MutexResult};
pub use mutex::{LeaseGuard, LeaseMutex};
pub use record::{LockRecord, NO_HOLDER};
pub use table::{MutexTable, DEFAULT_TTL_MINUTES};
