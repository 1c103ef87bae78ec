use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use shardlock_store::{Item, ItemKey};
use shardlock_types::ChainId;

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};

const ATTR_UPDATED: &str = "updated";
const ATTR_SIZE_KB: &str = "sizeKB";
const ATTR_BLOB_KEY: &str = "s3_key";

/// Row naming the blob that currently holds a chain's shared graph.
///
/// One row per (graph key, chain), overwritten on every persist.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GraphPointer {
    pub chain_id: ChainId,
    pub blob_key: String,
    /// Compressed blob size in kilobytes, as written.
    pub size_kb: String,
    pub updated: DateTime<Utc>,
}

impl GraphPointer {
    pub fn key(config: &SyncConfig, chain: ChainId) -> ItemKey {
        ItemKey::new(config.pointer_partition(), config.pointer_sort_key(chain))
    }

    pub fn to_item(&self, config: &SyncConfig) -> Item {
        Item::new(Self::key(config, self.chain_id))
            .with(
                ATTR_UPDATED,
                self.updated.to_rfc3339_opts(SecondsFormat::Millis, true),
            )
            .with(ATTR_SIZE_KB, self.size_kb.as_str())
            .with(ATTR_BLOB_KEY, self.blob_key.as_str())
    }

    pub fn from_item(item: &Item, chain: ChainId) -> SyncResult<Self> {
        let corrupt = |reason: String| SyncError::CorruptPointer {
            key: item.key.to_string(),
            reason,
        };
        let blob_key = item
            .require_str(ATTR_BLOB_KEY)
            .map_err(|e| corrupt(e.to_string()))?;
        let size_kb = item
            .get_str(ATTR_SIZE_KB)
            .map_err(|e| corrupt(e.to_string()))?
            .unwrap_or_default();
        let updated = item
            .require_str(ATTR_UPDATED)
            .map_err(|e| corrupt(e.to_string()))?;
        let updated = DateTime::parse_from_rfc3339(updated)
            .map_err(|e| corrupt(format!("bad timestamp {updated}: {e}")))?
            .with_timezone(&Utc);

        Ok(Self {
            chain_id: chain,
            blob_key: blob_key.to_string(),
            size_kb: size_kb.to_string(),
            updated,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn pointer() -> GraphPointer {
        GraphPointer {
            chain_id: ChainId::new(1),
            blob_key: "0xbot/sub_graph/1/t_SHARED_GRAPH".into(),
            size_kb: "1.25".into(),
            updated: Utc.timestamp_millis_opt(1_700_000_000_123).unwrap(),
        }
    }

    #[test]
    fn row_layout() {
        let config = SyncConfig {
            resource_prefix: "0xbot".into(),
            ..SyncConfig::default()
        };
        let item = pointer().to_item(&config);
        assert_eq!(item.key.partition, "0xbot|entity-cluster|graph_key");
        assert_eq!(item.key.sort, "shared_graph|1");
        assert_eq!(item.get_str("s3_key").unwrap(), Some("0xbot/sub_graph/1/t_SHARED_GRAPH"));
        assert_eq!(item.get_str("sizeKB").unwrap(), Some("1.25"));
        assert_eq!(item.get_str("updated").unwrap(), Some("2023-11-14T22:13:20.123Z"));
    }

    #[test]
    fn item_roundtrip() {
        let config = SyncConfig::default();
        let p = pointer();
        assert_eq!(GraphPointer::from_item(&p.to_item(&config), p.chain_id).unwrap(), p);
    }

    #[test]
    fn missing_blob_key_is_corrupt() {
        let item = Item::new(ItemKey::new("p", "shared_graph|1")).with("updated", "2024-01-01T00:00:00Z");
        assert!(matches!(
            GraphPointer::from_item(&item, ChainId::new(1)),
            Err(SyncError::CorruptPointer { .. })
        ));
    }

    #[test]
    fn bad_timestamp_is_corrupt() {
        let item = Item::new(ItemKey::new("p", "shared_graph|1"))
            .with("s3_key", "k")
            .with("updated", "yesterday");
        assert!(matches!(
            GraphPointer::from_item(&item, ChainId::new(1)),
            Err(SyncError::CorruptPointer { .. })
        ));
    }
}
