//! The [`EntityGraph`] structure: mutation, union, and cluster queries.
//!
//! # Invariants
//!
//! - Every edge endpoint is a node of the graph.
//! - No self-loops.
//! - Removing a node removes every edge touching it.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shardlock_types::Address;
use tracing::debug;

use crate::node::{EdgeInfo, NodeInfo, RelationKind};

/// Addresses containing this run of zero digits are placeholders and
/// precompiles, never entities.
const PLACEHOLDER_PATTERN: &str = "00000000";

/// Directed graph of address relationships.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityGraph {
    nodes: BTreeMap<Address, NodeInfo>,
    /// Outgoing adjacency: `from -> (to -> attributes)`.
    edges: BTreeMap<Address, BTreeMap<Address, EdgeInfo>>,
}

impl EntityGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains_node(&self, address: &Address) -> bool {
        self.nodes.contains_key(address)
    }

    pub fn node(&self, address: &Address) -> Option<&NodeInfo> {
        self.nodes.get(address)
    }

    pub fn edge(&self, from: &Address, to: &Address) -> Option<&EdgeInfo> {
        self.edges.get(from).and_then(|out| out.get(to))
    }

    pub fn contains_edge(&self, from: &Address, to: &Address) -> bool {
        self.edge(from, to).is_some()
    }

    pub fn nodes(&self) -> impl Iterator<Item = (&Address, &NodeInfo)> {
        self.nodes.iter()
    }

    pub fn edges(&self) -> impl Iterator<Item = (&Address, &Address, &EdgeInfo)> {
        self.edges
            .iter()
            .flat_map(|(from, out)| out.iter().map(move |(to, info)| (from, to, info)))
    }

    // ---------------------------------------------------------------
    // Mutation
    // ---------------------------------------------------------------

    /// Insert a node or merge `info` into the existing one.
    pub fn upsert_node(&mut self, address: Address, info: NodeInfo) {
        self.nodes
            .entry(address)
            .and_modify(|existing| existing.merge(&info))
            .or_insert(info);
    }

    /// Record that `address` was seen at `at`.
    ///
    /// Returns `false` for placeholder addresses, which are never added.
    pub fn observe_address(&mut self, address: Address, at: DateTime<Utc>) -> bool {
        if address.to_hex().contains(PLACEHOLDER_PATTERN) {
            return false;
        }
        self.upsert_node(address, NodeInfo::seen_at(at));
        true
    }

    /// Add or extend the edge `from -> to` with `info`.
    ///
    /// Both endpoints must already be nodes; otherwise nothing changes and
    /// `false` is returned. Self-loops are rejected the same way.
    pub fn add_edge(&mut self, from: Address, to: Address, info: EdgeInfo) -> bool {
        if from == to || !self.nodes.contains_key(&from) || !self.nodes.contains_key(&to) {
            return false;
        }
        self.edges
            .entry(from)
            .or_default()
            .entry(to)
            .and_modify(|existing| existing.merge(&info))
            .or_insert(info);
        true
    }

    /// Convenience for a single-kind relation with one piece of evidence.
    pub fn add_relation(
        &mut self,
        from: Address,
        to: Address,
        kind: RelationKind,
        evidence: Option<&str>,
    ) -> bool {
        let mut info = EdgeInfo::new(kind);
        if let Some(evidence) = evidence {
            info = info.with_evidence(evidence);
        }
        let added = self.add_edge(from, to, info);
        if added {
            debug!(from = %from.short_hex(), to = %to.short_hex(), "added relation");
        }
        added
    }

    /// Remove a node and its incident edges. Returns `true` if it existed.
    pub fn remove_node(&mut self, address: &Address) -> bool {
        if self.nodes.remove(address).is_none() {
            return false;
        }
        self.edges.remove(address);
        self.edges.retain(|_, out| {
            out.remove(address);
            !out.is_empty()
        });
        true
    }

    // ---------------------------------------------------------------
    // Merge
    // ---------------------------------------------------------------

    /// Fold `other` into `self`: node and edge set union with attribute merge.
    pub fn merge(&mut self, other: &EntityGraph) {
        for (address, info) in &other.nodes {
            self.upsert_node(*address, *info);
        }
        for (from, out) in &other.edges {
            let target = self.edges.entry(*from).or_default();
            for (to, info) in out {
                target
                    .entry(*to)
                    .and_modify(|existing| existing.merge(info))
                    .or_insert_with(|| info.clone());
            }
        }
    }

    /// The union of two graphs, leaving both inputs untouched.
    pub fn union(&self, other: &EntityGraph) -> EntityGraph {
        let mut merged = self.clone();
        merged.merge(other);
        merged
    }

    /// Union of any number of graphs.
    pub fn union_all<'a>(graphs: impl IntoIterator<Item = &'a EntityGraph>) -> EntityGraph {
        let mut merged = EntityGraph::new();
        for graph in graphs {
            merged.merge(graph);
        }
        merged
    }

    // ---------------------------------------------------------------
    // Queries
    // ---------------------------------------------------------------

    /// The entity cluster containing `address`.
    ///
    /// Only mutual relations count: `a` and `b` are linked when both
    /// `a -> b` and `b -> a` exist. The result includes `address` itself when
    /// it is a node, and is empty otherwise.
    pub fn cluster_of(&self, address: &Address) -> BTreeSet<Address> {
        let mut cluster = BTreeSet::new();
        if !self.nodes.contains_key(address) {
            return cluster;
        }

        cluster.insert(*address);
        let mut queue = VecDeque::from([*address]);
        while let Some(current) = queue.pop_front() {
            let Some(out) = self.edges.get(&current) else {
                continue;
            };
            for next in out.keys() {
                if self.contains_edge(next, &current) && cluster.insert(*next) {
                    queue.push_back(*next);
                }
            }
        }
        cluster
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn addr(n: u8) -> Address {
        let mut bytes = [0x11u8; 20];
        bytes[19] = n;
        Address::from_bytes(bytes)
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn pair(a: u8, b: u8) -> EntityGraph {
        let mut g = EntityGraph::new();
        g.observe_address(addr(a), at(a as i64));
        g.observe_address(addr(b), at(b as i64));
        g.add_relation(addr(a), addr(b), RelationKind::Funding, Some("0xtx"));
        g
    }

    #[test]
    fn edges_require_both_endpoints() {
        let mut g = EntityGraph::new();
        g.observe_address(addr(1), at(0));
        assert!(!g.add_relation(addr(1), addr(2), RelationKind::Transfer, None));
        assert_eq!(g.edge_count(), 0);

        g.observe_address(addr(2), at(0));
        assert!(g.add_relation(addr(1), addr(2), RelationKind::Transfer, None));
        assert!(!g.add_relation(addr(1), addr(1), RelationKind::Transfer, None));
        assert_eq!(g.edge_count(), 1);
    }

    #[test]
    fn placeholder_addresses_ignored() {
        let mut g = EntityGraph::new();
        let zero = Address::from_bytes([0u8; 20]);
        assert!(!g.observe_address(zero, at(0)));
        assert!(g.is_empty());
    }

    #[test]
    fn observe_updates_last_seen() {
        let mut g = EntityGraph::new();
        g.observe_address(addr(1), at(10));
        g.observe_address(addr(1), at(20));
        let info = g.node(&addr(1)).unwrap();
        assert_eq!(info.first_seen, at(10));
        assert_eq!(info.last_seen, at(20));
        assert_eq!(g.node_count(), 1);
    }

    #[test]
    fn remove_node_drops_incident_edges() {
        let mut g = pair(1, 2).union(&pair(2, 3));
        assert_eq!(g.edge_count(), 2);
        assert!(g.remove_node(&addr(2)));
        assert_eq!(g.edge_count(), 0);
        assert_eq!(g.node_count(), 2);
        assert!(!g.remove_node(&addr(2)));
    }

    #[test]
    fn union_of_disjoint_edges() {
        let merged = pair(1, 2).union(&pair(3, 4));
        assert_eq!(merged.node_count(), 4);
        assert_eq!(merged.edge_count(), 2);
        assert!(merged.contains_edge(&addr(1), &addr(2)));
        assert!(merged.contains_edge(&addr(3), &addr(4)));
    }

    #[test]
    fn union_with_empty_is_identity() {
        let g = pair(1, 2);
        assert_eq!(g.union(&EntityGraph::new()), g);
        assert_eq!(EntityGraph::new().union(&g), g);
    }

    #[test]
    fn cluster_follows_only_mutual_edges() {
        let mut g = pair(1, 2).union(&pair(2, 1)).union(&pair(2, 3)).union(&pair(3, 2));
        // One-way edge: 4 is not part of the cluster.
        g.merge(&pair(3, 4));

        let cluster = g.cluster_of(&addr(1));
        assert_eq!(cluster, BTreeSet::from([addr(1), addr(2), addr(3)]));
        assert_eq!(g.cluster_of(&addr(4)), BTreeSet::from([addr(4)]));
        assert!(g.cluster_of(&addr(9)).is_empty());
    }

    pub(crate) fn arb_graph() -> impl Strategy<Value = EntityGraph> {
        let kinds = prop_oneof![
            Just(RelationKind::Funding),
            Just(RelationKind::Transfer),
            Just(RelationKind::ContractCreation),
        ];
        (
            proptest::collection::vec((1u8..8, 0i64..1_000), 0..8),
            proptest::collection::vec((1u8..8, 1u8..8, kinds, 0u8..4), 0..12),
        )
            .prop_map(|(nodes, edges)| {
                let mut g = EntityGraph::new();
                for (n, t) in nodes {
                    g.observe_address(addr(n), at(t));
                }
                for (a, b, kind, ev) in edges {
                    g.add_relation(addr(a), addr(b), kind, Some(format!("0x{ev}").as_str()));
                }
                g
            })
    }

    proptest! {
        #[test]
        fn union_is_commutative(a in arb_graph(), b in arb_graph()) {
            prop_assert_eq!(a.union(&b), b.union(&a));
        }

        #[test]
        fn union_is_associative(a in arb_graph(), b in arb_graph(), c in arb_graph()) {
            prop_assert_eq!(a.union(&b).union(&c), a.union(&b.union(&c)));
        }

        #[test]
        fn union_is_idempotent(a in arb_graph(), b in arb_graph()) {
            let once = a.union(&b);
            prop_assert_eq!(once.union(&b), once.clone());
            prop_assert_eq!(a.union(&a), a);
        }
    }
}
