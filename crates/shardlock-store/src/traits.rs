use async_trait::async_trait;
use bytes::Bytes;

use crate::error::StoreResult;
use crate::item::{Condition, Item, ItemKey};

/// Key-value item store with conditional writes.
///
/// All implementations must satisfy these invariants:
/// - `put_item_if` evaluates the condition against the current item and
///   performs the write as one atomic step. Two concurrent conditional
///   writes whose conditions cannot both hold must not both succeed.
/// - A failed condition returns `Ok(false)` and leaves the item untouched.
/// - Backend failures are propagated as `Err`, never reported as `false`.
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Read an item by key. Returns `Ok(None)` if absent.
    async fn get_item(&self, key: &ItemKey) -> StoreResult<Option<Item>>;

    /// Write (create or replace) an item unconditionally.
    async fn put_item(&self, item: Item) -> StoreResult<()>;

    /// Write an item only if `condition` holds for the current item.
    ///
    /// Returns `Ok(true)` if written, `Ok(false)` if the condition failed.
    async fn put_item_if(&self, item: Item, condition: &Condition) -> StoreResult<bool>;

    /// Delete an item. Returns `true` if it existed.
    async fn delete_item(&self, key: &ItemKey) -> StoreResult<bool>;

    /// All items in a partition, ordered by sort key.
    async fn query(&self, partition: &str) -> StoreResult<Vec<Item>>;
}

/// Object store for whole-body blobs.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Read an object. Returns `Ok(None)` if absent.
    async fn get_object(&self, key: &str) -> StoreResult<Option<Bytes>>;

    /// Write (create or replace) an object.
    async fn put_object(&self, key: &str, body: Bytes) -> StoreResult<()>;

    /// Delete an object. Returns `true` if it existed.
    async fn delete_object(&self, key: &str) -> StoreResult<bool>;
}
