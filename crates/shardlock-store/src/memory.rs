//! In-memory stores for tests, simulations, and embedding.
//!
//! Both stores keep their data in a map behind a `RwLock`. Conditional puts
//! evaluate and write under a single write guard, which gives the atomic
//! compare-and-set the lease mutex requires. Either store can be switched
//! offline to simulate an unreachable backend.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::item::{Condition, Item, ItemKey};
use crate::traits::{BlobStore, LockStore};

fn poisoned<E: std::fmt::Display>(e: E) -> StoreError {
    StoreError::Backend(format!("lock poisoned: {e}"))
}

/// In-memory implementation of [`LockStore`].
#[derive(Debug, Default)]
pub struct InMemoryLockStore {
    items: RwLock<BTreeMap<ItemKey, Item>>,
    offline: AtomicBool,
}

impl InMemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with [`StoreError::Backend`].
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of items currently stored.
    pub fn len(&self) -> usize {
        self.items.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_online(&self) -> StoreResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("item store offline".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl LockStore for InMemoryLockStore {
    async fn get_item(&self, key: &ItemKey) -> StoreResult<Option<Item>> {
        self.check_online()?;
        let items = self.items.read().map_err(poisoned)?;
        Ok(items.get(key).cloned())
    }

    async fn put_item(&self, item: Item) -> StoreResult<()> {
        self.check_online()?;
        let mut items = self.items.write().map_err(poisoned)?;
        items.insert(item.key.clone(), item);
        Ok(())
    }

    async fn put_item_if(&self, item: Item, condition: &Condition) -> StoreResult<bool> {
        self.check_online()?;
        let mut items = self.items.write().map_err(poisoned)?;
        if !condition.evaluate(items.get(&item.key)) {
            debug!(key = %item.key, "conditional put rejected");
            return Ok(false);
        }
        items.insert(item.key.clone(), item);
        Ok(true)
    }

    async fn delete_item(&self, key: &ItemKey) -> StoreResult<bool> {
        self.check_online()?;
        let mut items = self.items.write().map_err(poisoned)?;
        Ok(items.remove(key).is_some())
    }

    async fn query(&self, partition: &str) -> StoreResult<Vec<Item>> {
        self.check_online()?;
        let items = self.items.read().map_err(poisoned)?;
        // Keys order by (partition, sort): the empty sort key is the lower bound.
        Ok(items
            .range(ItemKey::new(partition, "")..)
            .take_while(|(key, _)| key.partition == partition)
            .map(|(_, item)| item.clone())
            .collect())
    }
}

/// In-memory implementation of [`BlobStore`].
#[derive(Debug, Default)]
pub struct InMemoryBlobStore {
    objects: RwLock<HashMap<String, Bytes>>,
    offline: AtomicBool,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with [`StoreError::Backend`].
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Sorted list of stored object keys.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .objects
            .read()
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }

    fn check_online(&self) -> StoreResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("blob store offline".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn get_object(&self, key: &str) -> StoreResult<Option<Bytes>> {
        self.check_online()?;
        let objects = self.objects.read().map_err(poisoned)?;
        Ok(objects.get(key).cloned())
    }

    async fn put_object(&self, key: &str, body: Bytes) -> StoreResult<()> {
        self.check_online()?;
        let mut objects = self.objects.write().map_err(poisoned)?;
        debug!(key, len = body.len(), "object stored");
        objects.insert(key.to_string(), body);
        Ok(())
    }

    async fn delete_object(&self, key: &str) -> StoreResult<bool> {
        self.check_online()?;
        let mut objects = self.objects.write().map_err(poisoned)?;
        Ok(objects.remove(key).is_some())
    }
}
