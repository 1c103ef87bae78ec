//! Shared-graph synchronization between shards.
//!
//! Each shard accumulates a delta graph locally and periodically hands it to
//! [`GraphSynchronizer::persist`]. Under the per-chain lease lock the
//! synchronizer loads the shared graph, unions the delta into it, prunes,
//! uploads the compressed result, and repoints the chain's
//! [`GraphPointer`] at it. Because union is commutative, the order in which
//! shards win the lock does not matter; the lock only prevents lost updates.

pub mod config;
pub mod error;
pub mod pointer;
pub mod synchronizer;
pub mod types;

pub use config::SyncConfig;
pub use error::{SyncError, SyncResult};
pub use pointer::GraphPointer;
pub use synchronizer::GraphSynchronizer;
pub use types::{PersistOutcome, PersistReport};
