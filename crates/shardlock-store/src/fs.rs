//! Filesystem-backed blob store.
//!
//! Object keys are `/`-separated paths below a root directory. Bodies are
//! written to a temporary sibling file and renamed into place, so a reader
//! sees either the previous body or the new one.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::traits::BlobStore;

/// A [`BlobStore`] that maps object keys to files under `root`.
#[derive(Clone, Debug)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve an object key to a path, rejecting keys that escape the root.
    fn object_path(&self, key: &str) -> StoreResult<PathBuf> {
        if key.is_empty() {
            return Err(StoreError::InvalidKey("empty key".into()));
        }
        let relative = Path::new(key);
        for component in relative.components() {
            if !matches!(component, Component::Normal(_)) {
                return Err(StoreError::InvalidKey(key.to_string()));
            }
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn get_object(&self, key: &str) -> StoreResult<Option<Bytes>> {
        let path = self.object_path(key)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn put_object(&self, key: &str, body: Bytes) -> StoreResult<()> {
        let path = self.object_path(key)?;
        let parent = path
            .parent()
            .ok_or_else(|| StoreError::InvalidKey(key.to_string()))?;
        tokio::fs::create_dir_all(parent).await?;

        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| StoreError::InvalidKey(key.to_string()))?;
        let tmp = parent.join(format!(".{file_name}.{}.tmp", Uuid::new_v4()));

        tokio::fs::write(&tmp, &body).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        debug!(key, len = body.len(), "object written to disk");
        Ok(())
    }

    async fn delete_object(&self, key: &str) -> StoreResult<bool> {
        let path = self.object_path(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
