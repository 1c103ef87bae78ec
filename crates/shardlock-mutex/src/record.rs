//! The lock row and its encoding as a store [`Item`].

use serde::{Deserialize, Serialize};
use shardlock_store::{Item, ItemKey};

use crate::error::{MutexError, MutexResult};

/// Holder value meaning "currently unlocked".
pub const NO_HOLDER: &str = "__empty__";

pub(crate) const ATTR_HOLDER: &str = "holder";
pub(crate) const ATTR_EXPIRE_TS: &str = "expire_ts";
pub(crate) const ATTR_TTL: &str = "ttl";

const PARTITION_SUFFIX: &str = "|entity-cluster|mutex";

/// Partition key shared by all lock rows of one deployment.
pub fn lock_partition(resource_prefix: &str) -> String {
    format!("{resource_prefix}{PARTITION_SUFFIX}")
}

/// One named lock as stored in the item store.
///
/// `(resource_prefix, lock_name)` is the row key. Rows are never deleted: a
/// released lock carries [`NO_HOLDER`] and an expiry of zero.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    pub resource_prefix: String,
    pub lock_name: String,
    pub holder: String,
    /// Absolute expiry in epoch milliseconds. Authoritative for lock logic.
    pub expire_at_millis: i64,
    /// Epoch seconds after which the store may garbage-collect the row.
    pub ttl_seconds: Option<i64>,
}

impl LockRecord {
    /// The sentinel row written by release and prune.
    pub fn released(resource_prefix: &str, lock_name: &str) -> Self {
        Self {
            resource_prefix: resource_prefix.to_string(),
            lock_name: lock_name.to_string(),
            holder: NO_HOLDER.to_string(),
            expire_at_millis: 0,
            ttl_seconds: None,
        }
    }

    pub fn key(&self) -> ItemKey {
        ItemKey::new(lock_partition(&self.resource_prefix), self.lock_name.clone())
    }

    pub fn is_released(&self) -> bool {
        self.holder == NO_HOLDER
    }

    /// Held by someone and not yet expired at `now_millis`.
    pub fn is_live(&self, now_millis: i64) -> bool {
        !self.is_released() && now_millis < self.expire_at_millis
    }

    pub fn to_item(&self) -> Item {
        let item = Item::new(self.key())
            .with(ATTR_HOLDER, self.holder.as_str())
            .with(ATTR_EXPIRE_TS, self.expire_at_millis);
        match self.ttl_seconds {
            Some(ttl) => item.with(ATTR_TTL, ttl),
            None => item,
        }
    }

    pub fn from_item(item: &Item) -> MutexResult<Self> {
        let corrupt = |reason: String| MutexError::CorruptRecord {
            name: item.key.sort.clone(),
            reason,
        };
        let resource_prefix = item
            .key
            .partition
            .strip_suffix(PARTITION_SUFFIX)
            .ok_or_else(|| corrupt(format!("unexpected partition {}", item.key.partition)))?;
        let holder = item
            .get_str(ATTR_HOLDER)
            .map_err(|e| corrupt(e.to_string()))?
            .ok_or_else(|| corrupt("missing holder".into()))?;
        let expire_at_millis = item
            .get_num(ATTR_EXPIRE_TS)
            .map_err(|e| corrupt(e.to_string()))?
            .unwrap_or(0);
        let ttl_seconds = item.get_num(ATTR_TTL).map_err(|e| corrupt(e.to_string()))?;

        Ok(Self {
            resource_prefix: resource_prefix.to_string(),
            lock_name: item.key.sort.clone(),
            holder: holder.to_string(),
            expire_at_millis,
            ttl_seconds,
        })
    }
}
