//! Node and edge attributes, and how they merge.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Why two addresses are believed to belong to the same entity.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RelationKind {
    /// Value sent from one address to a fresh one.
    Funding,
    /// An address deployed a contract.
    ContractCreation,
    /// Any other value or token movement.
    Transfer,
    /// Heuristic-specific relation.
    Other(String),
}

impl fmt::Display for RelationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelationKind::Funding => f.write_str("funding"),
            RelationKind::ContractCreation => f.write_str("contract-creation"),
            RelationKind::Transfer => f.write_str("transfer"),
            RelationKind::Other(kind) => f.write_str(kind),
        }
    }
}

/// When an address was first and last observed by any shard.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl NodeInfo {
    pub fn seen_at(at: DateTime<Utc>) -> Self {
        Self {
            first_seen: at,
            last_seen: at,
        }
    }

    /// Widen the observation window to cover `other`.
    pub fn merge(&mut self, other: &NodeInfo) {
        self.first_seen = self.first_seen.min(other.first_seen);
        self.last_seen = self.last_seen.max(other.last_seen);
    }
}

/// Attributes of a directed relation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeInfo {
    pub kinds: BTreeSet<RelationKind>,
    /// Evidence references, typically transaction hashes.
    pub evidence: BTreeSet<String>,
}

impl EdgeInfo {
    pub fn new(kind: RelationKind) -> Self {
        Self {
            kinds: BTreeSet::from([kind]),
            evidence: BTreeSet::new(),
        }
    }

    pub fn with_evidence(mut self, evidence: impl Into<String>) -> Self {
        self.evidence.insert(evidence.into());
        self
    }

    pub fn merge(&mut self, other: &EdgeInfo) {
        self.kinds.extend(other.kinds.iter().cloned());
        self.evidence.extend(other.evidence.iter().cloned());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn node_merge_widens_window() {
        let mut a = NodeInfo::seen_at(at(100));
        a.merge(&NodeInfo {
            first_seen: at(50),
            last_seen: at(80),
        });
        assert_eq!(a.first_seen, at(50));
        assert_eq!(a.last_seen, at(100));
    }

    #[test]
    fn edge_merge_unions_sets() {
        let mut a = EdgeInfo::new(RelationKind::Funding).with_evidence("0xaa");
        let b = EdgeInfo::new(RelationKind::Transfer).with_evidence("0xbb");
        a.merge(&b);
        assert_eq!(a.kinds.len(), 2);
        assert_eq!(a.evidence.len(), 2);
    }

    #[test]
    fn relation_kind_display() {
        assert_eq!(RelationKind::ContractCreation.to_string(), "contract-creation");
        assert_eq!(RelationKind::Other("nonce-pair".into()).to_string(), "nonce-pair");
    }
}
