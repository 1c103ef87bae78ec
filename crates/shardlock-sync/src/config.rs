use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use shardlock_types::ChainId;

use crate::error::{SyncError, SyncResult};

/// Deployment settings for a [`GraphSynchronizer`](crate::GraphSynchronizer).
///
/// Every shard of one deployment must agree on `resource_prefix`,
/// `table_name` and `graph_key`: together they name the lock rows, the
/// pointer rows and the blob keys the shards share.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Deployment identity, usually the bot id.
    pub resource_prefix: String,
    /// Logical table name, part of the blob key.
    pub table_name: String,
    /// Logical graph name, part of the pointer partition key.
    pub graph_key: String,
    pub max_attempts: u32,
    pub retry_interval_ms: u64,
    /// Must cover one load + merge + compress + upload cycle.
    pub lease_duration_ms: u64,
    /// How long the store keeps a lock row after its lease.
    pub lock_ttl_minutes: i64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            resource_prefix: "shardlock".into(),
            table_name: "entity-cluster".into(),
            graph_key: "graph_key".into(),
            max_attempts: 5,
            retry_interval_ms: 2_000,
            lease_duration_ms: 10_000,
            lock_ttl_minutes: 15,
        }
    }
}

impl SyncConfig {
    /// Parse from TOML; missing keys take their defaults.
    pub fn from_toml_str(s: &str) -> SyncResult<Self> {
        let config: Self = toml::from_str(s).map_err(|e| SyncError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML file.
    pub fn load(path: &Path) -> SyncResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> SyncResult<String> {
        toml::to_string_pretty(self).map_err(|e| SyncError::Config(e.to_string()))
    }

    pub fn validate(&self) -> SyncResult<()> {
        for (field, value) in [
            ("resource_prefix", &self.resource_prefix),
            ("table_name", &self.table_name),
            ("graph_key", &self.graph_key),
        ] {
            if value.trim().is_empty() {
                return Err(SyncError::Config(format!("{field} must not be empty")));
            }
            if value.contains('|') || value.contains('/') {
                return Err(SyncError::Config(format!(
                    "{field} must not contain '|' or '/': {value}"
                )));
            }
        }
        if self.max_attempts == 0 {
            return Err(SyncError::Config("max_attempts must be at least 1".into()));
        }
        if self.lease_duration_ms == 0 {
            return Err(SyncError::Config("lease_duration_ms must be positive".into()));
        }
        if self.lock_ttl_minutes < 0 {
            return Err(SyncError::Config("lock_ttl_minutes must not be negative".into()));
        }
        Ok(())
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    pub fn lease_duration(&self) -> Duration {
        Duration::from_millis(self.lease_duration_ms)
    }

    /// One lock per chain.
    pub fn lock_name(&self, chain: ChainId) -> String {
        format!("mutex|{chain}")
    }

    pub fn pointer_partition(&self) -> String {
        format!("{}|entity-cluster|{}", self.resource_prefix, self.graph_key)
    }

    pub fn pointer_sort_key(&self, chain: ChainId) -> String {
        format!("shared_graph|{chain}")
    }

    pub fn blob_key(&self, chain: ChainId) -> String {
        format!(
            "{}/sub_graph/{}/{}_SHARED_GRAPH",
            self.resource_prefix, chain, self.table_name
        )
    }
}
