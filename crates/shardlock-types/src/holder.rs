use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TypeError;

/// Opaque identity of a lock requester.
///
/// Holders are compared by string equality only. A shard that does not pick
/// its own identity gets a random UUID via [`HolderId::random`].
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HolderId(String);

impl HolderId {
    /// Wrap a caller-supplied identity. Empty identities are rejected.
    pub fn new(id: impl Into<String>) -> Result<Self, TypeError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(TypeError::EmptyHolder);
        }
        Ok(Self(id))
    }

    /// Fresh random identity.
    pub fn random() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for HolderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HolderId({})", self.0)
    }
}

impl fmt::Display for HolderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for HolderId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_holders_differ() {
        assert_ne!(HolderId::random(), HolderId::random());
    }

    #[test]
    fn empty_holder_rejected() {
        assert_eq!(HolderId::new("  ").unwrap_err(), TypeError::EmptyHolder);
    }

    #[test]
    fn keeps_caller_identity_verbatim() {
        let h = HolderId::new("shard-a").unwrap();
        assert_eq!(h.as_str(), "shard-a");
        assert_eq!(h.to_string(), "shard-a");
    }
}
