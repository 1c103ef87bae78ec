//! Storage collaborators for shardlock.
//!
//! Two remote services back the lease mutex and the shared graph:
//!
//! - a key-value **item store** with conditional writes ([`LockStore`]),
//!   holding lock rows and graph pointer rows, and
//! - an **object store** ([`BlobStore`]) holding compressed graph bodies.
//!
//! # Storage Backends
//!
//! - [`InMemoryLockStore`] / [`InMemoryBlobStore`] -- map-based stores for
//!   tests, simulations and embedding
//! - [`FsBlobStore`] -- objects as files under a root directory
//!
//! # Design Rules
//!
//! 1. `put_item_if` evaluates its [`Condition`] and writes atomically. This
//!    compare-and-set is what the lease mutex relies on for correctness; a
//!    backend that cannot provide it must not implement [`LockStore`].
//! 2. A failed condition is an answer (`Ok(false)`), not an error.
//! 3. Blob writes replace the whole object; readers never see a partial body.
//! 4. The stores never interpret attribute or blob contents.

pub mod error;
pub mod fs;
pub mod item;
pub mod memory;
pub mod traits;

pub use error::{StoreError, StoreResult};
pub use fs::FsBlobStore;
pub use item::{AttributeValue, Condition, Item, ItemKey};
pub use memory::{InMemoryBlobStore, InMemoryLockStore};
pub use traits::{BlobStore, LockStore};
