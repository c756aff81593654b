//! Object storage abstraction and backends for Ferry.
//!
//! This crate provides:
//! - The `ObjectStore` trait used by the publisher and the bootstrapper
//! - Object attributes (content type and user metadata) carried on every write
//! - Backends: local filesystem, S3-compatible and in-memory

pub mod backends;
pub mod error;
pub mod traits;

pub use backends::filesystem::FilesystemBackend;
pub use backends::memory::MemoryBackend;
pub use backends::s3::{S3Backend, S3Options};
pub use error::{StorageError, StorageResult};
pub use traits::{ObjectAttributes, ObjectMeta, ObjectStore, ObjectSummary, PutReceipt};

use ferry_core::config::StorageConfig;
use std::sync::Arc;

/// Open the backend named by `config`.
pub async fn from_config(config: &StorageConfig) -> StorageResult<Arc<dyn ObjectStore>> {
    config.validate().map_err(StorageError::Config)?;

    if let StorageConfig::Filesystem { path } = config {
        return Ok(Arc::new(FilesystemBackend::new(path).await?));
    }
    let options = S3Options::from_config(config)
        .ok_or_else(|| StorageError::Config("unsupported storage backend".to_string()))?;
    Ok(Arc::new(S3Backend::new(options)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tempfile::tempdir;

    #[tokio::test]
    async fn from_config_filesystem_ok() {
        let temp = tempdir().unwrap();
        let config = StorageConfig::Filesystem {
            path: temp.path().join("store"),
        };

        let store = from_config(&config).await.unwrap();
        store
            .put(
                "init_db/latest.sql",
                Bytes::from_static(b"select 1;"),
                &ObjectAttributes::default(),
            )
            .await
            .unwrap();
        assert!(store.exists("init_db/latest.sql").await.unwrap());
        assert_eq!(store.backend_name(), "filesystem");
    }

    #[tokio::test]
    async fn from_config_s3_ok() {
        let config = StorageConfig::S3 {
            bucket: "bucket".to_string(),
            endpoint: Some("minio:9000".to_string()),
            region: Some("us-east-1".to_string()),
            prefix: Some("ferry".to_string()),
            access_key_id: None,
            secret_access_key: None,
            force_path_style: true,
            server_side_encryption: false,
        };

        let store = from_config(&config).await.unwrap();
        assert_eq!(store.backend_name(), "s3");
    }

    #[tokio::test]
    async fn from_config_rejects_partial_credentials() {
        let config = StorageConfig::S3 {
            bucket: "bucket".to_string(),
            endpoint: None,
            region: None,
            prefix: None,
            access_key_id: Some("access".to_string()),
            secret_access_key: None,
            force_path_style: false,
            server_side_encryption: false,
        };

        match from_config(&config).await {
            Ok(_) => panic!("expected error"),
            Err(StorageError::Config(_)) => {}
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }
}
