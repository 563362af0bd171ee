//! In-process blob store.

use std::io::Cursor;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tokio::io::AsyncReadExt;

use super::{BlobKey, BlobReader, BlobStore, StorageError};

/// An object held by [`MemoryBlobStore`].
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub data: Bytes,
    pub content_type: String,
}

/// Blob store keeping every object in memory. Cloning shares the contents.
#[derive(Clone, Default)]
pub struct MemoryBlobStore {
    objects: Arc<DashMap<String, StoredObject>>,
}

impl MemoryBlobStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an object directly, bypassing the streaming path.
    pub fn insert(&self, key: &BlobKey, data: impl Into<Bytes>, content_type: &str) {
        self.objects.insert(
            key.path(),
            StoredObject {
                data: data.into(),
                content_type: content_type.to_string(),
            },
        );
    }

    #[must_use]
    pub fn object(&self, key: &BlobKey) -> Option<StoredObject> {
        self.objects.get(&key.path()).map(|o| o.value().clone())
    }

    #[must_use]
    pub fn contains(&self, key: &BlobKey) -> bool {
        self.objects.contains_key(&key.path())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(
        &self,
        key: &BlobKey,
        mut body: BlobReader,
        content_type: &str,
    ) -> Result<u64, StorageError> {
        let mut data = Vec::new();
        body.read_to_end(&mut data).await?;
        let size = data.len() as u64;
        self.insert(key, data, content_type);
        Ok(size)
    }

    async fn get(&self, key: &BlobKey) -> Result<BlobReader, StorageError> {
        let object = self
            .object(key)
            .ok_or_else(|| StorageError::NotFound(key.path()))?;
        Ok(Box::pin(Cursor::new(object.data)))
    }

    async fn delete(&self, key: &BlobKey) -> Result<(), StorageError> {
        self.objects.remove(&key.path());
        Ok(())
    }
}
