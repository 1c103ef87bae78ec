//! Foundation types for shardlock.
//!
//! Every other shardlock crate depends on `shardlock-types`. The types here
//! carry no storage or locking behavior of their own.
//!
//! # Key Types
//!
//! - [`ChainId`]: numeric chain identifier that partitions locks and graphs
//! - [`HolderId`]: opaque identity of a lock requester
//! - [`Address`]: normalized 20-byte account address, the graph node key
//! - [`Clock`]: millisecond wall clock, with [`SystemClock`] and [`ManualClock`]

pub mod address;
pub mod chain;
pub mod clock;
pub mod error;
pub mod holder;

pub use address::Address;
pub use chain::ChainId;
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::TypeError;
pub use holder::HolderId;
