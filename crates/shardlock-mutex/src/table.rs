//! [`MutexTable`]: the three conditional writes that make up the lock.
//!
//! | operation          | writes                      | guarded by                           |
//! |--------------------|-----------------------------|--------------------------------------|
//! | `write_lock_item`  | holder, now + lease, ttl    | holder == sentinel OR row absent     |
//! | `clear_lock_item`  | sentinel, expiry 0          | holder == caller OR row absent       |
//! | `prune_expired`    | sentinel, expiry 0          | expiry < now OR row absent           |

use std::sync::Arc;
use std::time::Duration;

use shardlock_store::{Condition, LockStore};
use shardlock_types::Clock;
use tracing::{debug, info, warn};

use crate::error::{MutexError, MutexResult};
use crate::record::{lock_partition, LockRecord, ATTR_EXPIRE_TS, ATTR_HOLDER, NO_HOLDER};

/// Store-side row retention after expiry when none is configured (2 days).
pub const DEFAULT_TTL_MINUTES: i64 = 2 * 24 * 60;

/// The lock rows of one deployment, addressed by lock name.
#[derive(Clone)]
pub struct MutexTable {
    store: Arc<dyn LockStore>,
    clock: Arc<dyn Clock>,
    resource_prefix: String,
    ttl_minutes: i64,
}

impl std::fmt::Debug for MutexTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutexTable")
            .field("partition", &lock_partition(&self.resource_prefix))
            .field("ttl_minutes", &self.ttl_minutes)
            .finish()
    }
}

impl MutexTable {
    pub fn new(
        store: Arc<dyn LockStore>,
        clock: Arc<dyn Clock>,
        resource_prefix: impl Into<String>,
    ) -> Self {
        Self {
            store,
            clock,
            resource_prefix: resource_prefix.into(),
            ttl_minutes: DEFAULT_TTL_MINUTES,
        }
    }

    /// How long the store keeps a row past its lease before garbage collection.
    pub fn with_ttl_minutes(mut self, ttl_minutes: i64) -> Self {
        self.ttl_minutes = ttl_minutes;
        self
    }

    pub fn resource_prefix(&self) -> &str {
        &self.resource_prefix
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Read the raw lock row, if any.
    pub async fn get_lock(&self, name: &str) -> MutexResult<Option<LockRecord>> {
        validate_name(name)?;
        let key = LockRecord::released(&self.resource_prefix, name).key();
        match self.store.get_item(&key).await? {
            Some(item) => Ok(Some(LockRecord::from_item(&item)?)),
            None => Ok(None),
        }
    }

    /// Try to take the lock for `holder` for `lease`.
    ///
    /// Returns `false` when another holder's row is in place, expired or not;
    /// clearing expired rows is [`MutexTable::prune_expired`]'s job.
    pub async fn write_lock_item(&self, name: &str, holder: &str, lease: Duration) -> MutexResult<bool> {
        validate_name(name)?;
        validate_holder(holder)?;
        let lease_ms = lease_millis(lease)?;

        let expire_at_millis = self.clock.now_millis().saturating_add(lease_ms);
        let ttl_seconds = expire_at_millis / 1000 + self.ttl_minutes * 60;
        let record = LockRecord {
            resource_prefix: self.resource_prefix.clone(),
            lock_name: name.to_string(),
            holder: holder.to_string(),
            expire_at_millis,
            ttl_seconds: Some(ttl_seconds),
        };
        debug!(lock = name, holder, expire_at_millis, "writing lock item");

        let condition = Condition::equals(ATTR_HOLDER, NO_HOLDER).or(Condition::NotExists);
        let acquired = self.store.put_item_if(record.to_item(), &condition).await?;
        if acquired {
            debug!(lock = name, holder, "lock acquired");
        } else {
            info!(lock = name, holder, "lock is being held");
        }
        Ok(acquired)
    }

    /// Release the lock if `holder` still owns it.
    ///
    /// Returns `false` if a different holder owns the row, which happens when
    /// the caller's lease expired and someone else took over.
    pub async fn clear_lock_item(&self, name: &str, holder: &str) -> MutexResult<bool> {
        validate_name(name)?;
        validate_holder(holder)?;

        let record = LockRecord::released(&self.resource_prefix, name);
        let condition = Condition::equals(ATTR_HOLDER, holder).or(Condition::NotExists);
        let released = self.store.put_item_if(record.to_item(), &condition).await?;
        if released {
            debug!(lock = name, holder, "release succeeded");
        } else {
            warn!(lock = name, holder, "release failed: lock owned by another holder");
        }
        Ok(released)
    }

    /// Reset the row to the sentinel if its lease has run out.
    ///
    /// Safe to call against a live lease: the guard rejects the write.
    pub async fn prune_expired(&self, name: &str, holder: &str) -> MutexResult<bool> {
        validate_name(name)?;

        let now = self.clock.now_millis();
        debug!(lock = name, holder, now, "pruning expired lock");
        let record = LockRecord::released(&self.resource_prefix, name);
        let condition = Condition::less_than(ATTR_EXPIRE_TS, now).or(Condition::NotExists);
        let pruned = self.store.put_item_if(record.to_item(), &condition).await?;
        if pruned {
            debug!(lock = name, holder, "prune succeeded");
        } else {
            debug!(lock = name, holder, "prune skipped: lease still live");
        }
        Ok(pruned)
    }
}

fn validate_name(name: &str) -> MutexResult<()> {
    if name.trim().is_empty() {
        return Err(MutexError::InvalidName);
    }
    Ok(())
}

pub(crate) fn validate_holder(holder: &str) -> MutexResult<()> {
    if holder.trim().is_empty() || holder == NO_HOLDER {
        return Err(MutexError::InvalidHolder(holder.to_string()));
    }
    Ok(())
}

pub(crate) fn lease_millis(lease: Duration) -> MutexResult<i64> {
    match i64::try_from(lease.as_millis()) {
        Ok(ms) if ms > 0 => Ok(ms),
        _ => Err(MutexError::InvalidLease(lease)),
    }
}
