//! In-process storage backend.
//!
//! Keeps objects in a map behind a mutex. Used by tests and dry runs; every
//! write gets a monotonically increasing version id.

use crate::error::{StorageError, StorageResult};
use crate::traits::{ObjectAttributes, ObjectMeta, ObjectStore, ObjectSummary, PutReceipt};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use std::sync::atomic::{AtomicU64, Ordering};
use time::OffsetDateTime;

#[derive(Clone, Debug)]
struct StoredObject {
    data: Bytes,
    attributes: ObjectAttributes,
    version_id: String,
    last_modified: OffsetDateTime,
}

/// In-memory object store.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    objects: Mutex<BTreeMap<String, StoredObject>>,
    next_version: AtomicU64,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.lock().map(|objects| objects.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> StorageResult<MutexGuard<'_, BTreeMap<String, StoredObject>>> {
        self.objects
            .lock()
            .map_err(|_| StorageError::Io(std::io::Error::other("memory store lock poisoned")))
    }

    fn store(
        &self,
        key: &str,
        data: Bytes,
        attributes: ObjectAttributes,
    ) -> StorageResult<PutReceipt> {
        if key.is_empty() {
            return Err(StorageError::InvalidKey("empty key".to_string()));
        }
        let version_id = (self.next_version.fetch_add(1, Ordering::SeqCst) + 1).to_string();
        self.lock()?.insert(
            key.to_string(),
            StoredObject {
                data,
                attributes,
                version_id: version_id.clone(),
                last_modified: OffsetDateTime::now_utc(),
            },
        );
        Ok(PutReceipt {
            version_id: Some(version_id),
        })
    }
}

#[async_trait]
impl ObjectStore for MemoryBackend {
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        Ok(self.lock()?.contains_key(key))
    }

    async fn head(&self, key: &str) -> StorageResult<ObjectMeta> {
        let objects = self.lock()?;
        let object = objects
            .get(key)
            .ok_or_else(|| StorageError::NotFound(key.to_string()))?;
        Ok(ObjectMeta {
            size: object.data.len() as u64,
            last_modified: Some(object.last_modified),
            content_type: object.attributes.content_type.clone(),
            version_id: Some(object.version_id.clone()),
            metadata: object.attributes.metadata.clone(),
        })
    }

    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        self.lock()?
            .get(key)
            .map(|object| object.data.clone())
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn put(
        &self,
        key: &str,
        data: Bytes,
        attributes: &ObjectAttributes,
    ) -> StorageResult<PutReceipt> {
        self.store(key, data, attributes.clone())
    }

    async fn copy(
        &self,
        from: &str,
        to: &str,
        attributes: Option<&ObjectAttributes>,
    ) -> StorageResult<PutReceipt> {
        let source = self
            .lock()?
            .get(from)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(from.to_string()))?;
        let attributes = attributes.cloned().unwrap_or(source.attributes);
        self.store(to, source.data, attributes)
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.lock()?
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<ObjectSummary>> {
        Ok(self
            .lock()?
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, object)| ObjectSummary {
                key: key.clone(),
                size: object.data.len() as u64,
                last_modified: Some(object.last_modified),
            })
            .collect())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
