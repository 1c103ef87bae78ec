//! Entity relationship graph shared between shards.
//!
//! Nodes are account addresses, directed edges are "related to" claims with
//! the kinds of relation and the evidence that produced them. The graph is
//! built so that merging is a pure set union: [`EntityGraph::union`] is
//! commutative, associative and idempotent, attributes included. That is
//! what lets shards merge deltas in whatever order they win the lock.

pub mod codec;
pub mod error;
pub mod graph;
pub mod node;
pub mod prune;

pub use codec::{decode, encode, EncodedGraph};
pub use error::{GraphError, GraphResult};
pub use graph::EntityGraph;
pub use node::{EdgeInfo, NodeInfo, RelationKind};
pub use prune::{MaxAgePolicy, MaxNodesPolicy, NoPrune, PruneChain, PrunePolicy, DEFAULT_MAX_AGE_DAYS};
