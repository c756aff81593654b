//! Storage trait definitions.

use crate::error::StorageResult;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeMap;
use time::OffsetDateTime;

/// Attributes written together with object bytes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ObjectAttributes {
    /// MIME type of the object.
    pub content_type: Option<String>,
    /// User metadata (flat string map).
    pub metadata: BTreeMap<String, String>,
}

impl ObjectAttributes {
    /// Attributes with the given content type and metadata.
    pub fn new(content_type: impl Into<String>, metadata: BTreeMap<String, String>) -> Self {
        Self {
            content_type: Some(content_type.into()),
            metadata,
        }
    }
}

/// Result of a successful write.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PutReceipt {
    /// Backend-assigned version identifier, when the backend keeps one.
    pub version_id: Option<String>,
}

/// One entry of a listing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectSummary {
    pub key: String,
    pub size: u64,
    pub last_modified: Option<OffsetDateTime>,
}

/// Metadata about a stored object.
#[derive(Clone, Debug, Default)]
pub struct ObjectMeta {
    /// Object size in bytes.
    pub size: u64,
    /// Last modification time (if available).
    pub last_modified: Option<OffsetDateTime>,
    /// Content type (if available).
    pub content_type: Option<String>,
    /// Backend version identifier (if available).
    pub version_id: Option<String>,
    /// User metadata. Empty when the object was written without any.
    pub metadata: BTreeMap<String, String>,
}

/// Object store abstraction used by the publisher and the bootstrapper.
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Check if an object exists.
    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Get an object's size and metadata without fetching content.
    async fn head(&self, key: &str) -> StorageResult<ObjectMeta>;

    /// Get an object's content.
    async fn get(&self, key: &str) -> StorageResult<Bytes>;

    /// Put an object atomically, replacing any previous content and metadata.
    async fn put(
        &self,
        key: &str,
        data: Bytes,
        attributes: &ObjectAttributes,
    ) -> StorageResult<PutReceipt>;

    /// Copy an object. With `attributes`, the destination's content type and
    /// metadata are replaced by them; otherwise the source's are kept.
    async fn copy(
        &self,
        from: &str,
        to: &str,
        attributes: Option<&ObjectAttributes>,
    ) -> StorageResult<PutReceipt>;

    /// Delete an object.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// List objects whose key starts with `prefix`, ordered by key.
    async fn list(&self, prefix: &str) -> StorageResult<Vec<ObjectSummary>>;

    /// Get the name of this storage backend (e.g., "s3", "filesystem").
    fn backend_name(&self) -> &'static str;

    /// Verify storage backend connectivity.
    ///
    /// The default implementation returns Ok(()), suitable for backends that
    /// don't require connectivity verification.
    async fn health_check(&self) -> StorageResult<()> {
        Ok(())
    }
}
