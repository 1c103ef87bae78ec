//! Pruning policies applied to the merged graph before it is stored.
//!
//! A policy must be safe to reapply: pruning an already-pruned graph again
//! removes nothing new at the same instant. Closures `Fn(&mut EntityGraph)
//! -> usize` are policies too.

use std::sync::Arc;

use chrono::Duration;
use shardlock_types::{Address, Clock};
use tracing::info;

use crate::graph::EntityGraph;

/// Nodes unseen for longer than this are dropped by [`MaxAgePolicy::default_for`].
pub const DEFAULT_MAX_AGE_DAYS: i64 = 7;

/// Removes nodes from a graph. Returns how many were removed.
pub trait PrunePolicy: Send + Sync {
    fn prune(&self, graph: &mut EntityGraph) -> usize;
}

impl<F> PrunePolicy for F
where
    F: Fn(&mut EntityGraph) -> usize + Send + Sync,
{
    fn prune(&self, graph: &mut EntityGraph) -> usize {
        self(graph)
    }
}

/// Policies applied in order.
#[derive(Default)]
pub struct PruneChain(pub Vec<Box<dyn PrunePolicy>>);

impl PruneChain {
    pub fn then(mut self, policy: impl PrunePolicy + 'static) -> Self {
        self.0.push(Box::new(policy));
        self
    }
}

impl PrunePolicy for PruneChain {
    fn prune(&self, graph: &mut EntityGraph) -> usize {
        self.0.iter().map(|policy| policy.prune(graph)).sum()
    }
}

/// Keeps everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoPrune;

impl PrunePolicy for NoPrune {
    fn prune(&self, _graph: &mut EntityGraph) -> usize {
        0
    }
}

/// Drops nodes whose `last_seen` is older than `max_age`.
#[derive(Clone, Debug)]
pub struct MaxAgePolicy {
    max_age: Duration,
    clock: Arc<dyn Clock>,
}

impl MaxAgePolicy {
    pub fn new(max_age: Duration, clock: Arc<dyn Clock>) -> Self {
        Self { max_age, clock }
    }

    /// Seven-day retention.
    pub fn default_for(clock: Arc<dyn Clock>) -> Self {
        Self::new(Duration::days(DEFAULT_MAX_AGE_DAYS), clock)
    }
}

impl PrunePolicy for MaxAgePolicy {
    fn prune(&self, graph: &mut EntityGraph) -> usize {
        let cutoff = self.clock.now_utc() - self.max_age;
        let stale: Vec<Address> = graph
            .nodes()
            .filter(|(_, info)| info.last_seen < cutoff)
            .map(|(address, _)| *address)
            .collect();
        for address in &stale {
            graph.remove_node(address);
        }
        if !stale.is_empty() {
            info!(removed = stale.len(), remaining = graph.node_count(), "pruned stale addresses");
        }
        stale.len()
    }
}

/// Keeps at most `max_nodes` nodes, preferring the most recently seen.
#[derive(Clone, Copy, Debug)]
pub struct MaxNodesPolicy {
    pub max_nodes: usize,
}

impl PrunePolicy for MaxNodesPolicy {
    fn prune(&self, graph: &mut EntityGraph) -> usize {
        let excess = graph.node_count().saturating_sub(self.max_nodes);
        if excess == 0 {
            return 0;
        }
        // Oldest first; ties broken by address so every shard drops the same nodes.
        let mut by_age: Vec<_> = graph
            .nodes()
            .map(|(address, info)| (info.last_seen, *address))
            .collect();
        by_age.sort();
        for (_, address) in by_age.iter().take(excess) {
            graph.remove_node(address);
        }
        info!(removed = excess, remaining = graph.node_count(), "pruned graph to size limit");
        excess
    }
}
