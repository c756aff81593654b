//! Local filesystem storage backend.
//!
//! Object bytes live at `{root}/{key}`. Content type, user metadata and a
//! version id live in a JSON sidecar at `{root}/.ferry-meta/{key}.json`,
//! which is never listed and cannot be addressed as a key.

use crate::error::{StorageError, StorageResult};
use crate::traits::{ObjectAttributes, ObjectMeta, ObjectStore, ObjectSummary, PutReceipt};
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::instrument;
use uuid::Uuid;

/// Reserved directory holding metadata sidecars.
pub const META_DIR: &str = ".ferry-meta";

/// Marker embedded in temp file names during atomic writes.
const TEMP_MARKER: &str = ".tmp.";

#[derive(Debug, Default, Serialize, Deserialize)]
struct Sidecar {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content_type: Option<String>,
    #[serde(default)]
    metadata: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    version_id: Option<String>,
}

/// Local filesystem object store.
pub struct FilesystemBackend {
    root: PathBuf,
}

impl FilesystemBackend {
    /// Create a new filesystem backend.
    pub async fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    /// Get the full path for a key, with path traversal protection.
    ///
    /// Runs the checks on the blocking pool since they `canonicalize` and stat.
    async fn key_path(&self, key: &str) -> StorageResult<PathBuf> {
        let root = self.root.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || Self::key_path_sync(&root, &key))
            .await
            .map_err(|e| {
                StorageError::Io(std::io::Error::other(format!("spawn_blocking failed: {e}")))
            })?
    }

    /// Returns an error if the key would escape the storage root, either
    /// lexically or through a symlink, or if it addresses the sidecar area.
    fn key_path_sync(root: &Path, key: &str) -> StorageResult<PathBuf> {
        if key.is_empty() {
            return Err(StorageError::InvalidKey("empty key".to_string()));
        }
        if key.contains("..") || key.starts_with('/') || key.starts_with('\\') {
            return Err(StorageError::InvalidKey(format!(
                "path traversal not allowed: {key}"
            )));
        }

        let mut components = Path::new(key).components().peekable();
        if let Some(std::path::Component::Normal(first)) = components.peek()
            && *first == META_DIR
        {
            return Err(StorageError::InvalidKey(format!(
                "{META_DIR} is reserved: {key}"
            )));
        }
        for component in components {
            if !matches!(component, std::path::Component::Normal(_)) {
                return Err(StorageError::InvalidKey(format!(
                    "contains unsafe path component: {key}"
                )));
            }
        }
        if key.contains(TEMP_MARKER) {
            return Err(StorageError::InvalidKey(format!(
                "{TEMP_MARKER} is reserved for temporary files: {key}"
            )));
        }

        let path = root.join(key);
        let root_canonical = root.canonicalize().map_err(|e| {
            StorageError::Io(std::io::Error::new(
                e.kind(),
                format!("failed to canonicalize root: {e}"),
            ))
        })?;

        match std::fs::symlink_metadata(&path) {
            Ok(meta) => {
                let canonical = path.canonicalize().map_err(|e| {
                    if meta.file_type().is_symlink() {
                        StorageError::InvalidKey(format!(
                            "symlink target missing or invalid: {key}"
                        ))
                    } else {
                        StorageError::Io(std::io::Error::new(
                            e.kind(),
                            format!("failed to canonicalize path: {e}"),
                        ))
                    }
                })?;
                if !canonical.starts_with(&root_canonical) {
                    return Err(StorageError::InvalidKey(format!(
                        "resolved path escapes storage root: {key}"
                    )));
                }
                return Ok(path);
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                return Err(StorageError::Io(std::io::Error::new(
                    err.kind(),
                    format!("failed to stat path: {err}"),
                )));
            }
        }

        // New key: the nearest existing ancestor must resolve inside the root,
        // otherwise create_dir_all would follow a symlinked directory out.
        let mut ancestor = path.as_path();
        while let Some(parent) = ancestor.parent() {
            match std::fs::symlink_metadata(parent) {
                Ok(meta) => {
                    let parent_canonical = parent.canonicalize().map_err(|e| {
                        if meta.file_type().is_symlink() {
                            StorageError::InvalidKey(format!(
                                "ancestor symlink target missing or invalid: {key}"
                            ))
                        } else {
                            StorageError::Io(std::io::Error::new(
                                e.kind(),
                                format!("failed to canonicalize ancestor: {e}"),
                            ))
                        }
                    })?;
                    if !parent_canonical.starts_with(&root_canonical) {
                        return Err(StorageError::InvalidKey(format!(
                            "ancestor path escapes storage root: {key}"
                        )));
                    }
                    break;
                }
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => {
                    return Err(StorageError::Io(std::io::Error::new(
                        err.kind(),
                        format!("failed to stat ancestor: {err}"),
                    )));
                }
            }
            ancestor = parent;
        }

        Ok(path)
    }

    /// Sidecar path for an already validated key.
    fn sidecar_path(&self, key: &str) -> PathBuf {
        self.root.join(META_DIR).join(format!("{key}.json"))
    }

    async fn read_sidecar(&self, key: &str) -> StorageResult<Sidecar> {
        match fs::read(self.sidecar_path(key)).await {
            Ok(raw) => serde_json::from_slice(&raw).map_err(|e| StorageError::Metadata {
                key: key.to_string(),
                reason: e.to_string(),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Sidecar::default()),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    /// Write bytes to a unique fsynced temp file next to `path` and return
    /// the temp path. Nothing is visible under `path` yet.
    async fn stage(path: &Path, data: &[u8]) -> StorageResult<PathBuf> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let temp_name = format!("{TEMP_MARKER}{}", Uuid::new_v4());
        let temp_path = path.with_file_name(
            path.file_name()
                .map(|n| format!("{}{}", n.to_string_lossy(), temp_name))
                .unwrap_or_else(|| temp_name.clone()),
        );
        let written = async {
            let mut file = fs::File::create(&temp_path).await?;
            file.write_all(data).await?;
            file.sync_all().await
        }
        .await;
        if let Err(e) = written {
            let _ = fs::remove_file(&temp_path).await;
            return Err(StorageError::Io(e));
        }
        Ok(temp_path)
    }

    /// Replace the object at `path` and its sidecar as one unit.
    ///
    /// Both files are staged before either is renamed. The sidecar lands
    /// first; if the data rename then fails the previous sidecar is put back,
    /// so a failed write leaves the old bytes under the old metadata.
    async fn write_object(
        &self,
        key: &str,
        path: &Path,
        data: &[u8],
        content_type: Option<String>,
        metadata: BTreeMap<String, String>,
    ) -> StorageResult<PutReceipt> {
        let version_id = Uuid::new_v4().simple().to_string();
        let sidecar = Sidecar {
            content_type,
            metadata,
            version_id: Some(version_id.clone()),
        };
        let sidecar_bytes = serde_json::to_vec_pretty(&sidecar).map_err(|e| {
            StorageError::Metadata {
                key: key.to_string(),
                reason: e.to_string(),
            }
        })?;
        let sidecar_path = self.sidecar_path(key);

        let previous = match fs::read(&sidecar_path).await {
            Ok(raw) => Some(raw),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(StorageError::Io(e)),
        };

        let data_temp = Self::stage(path, data).await?;
        let sidecar_temp = match Self::stage(&sidecar_path, &sidecar_bytes).await {
            Ok(temp) => temp,
            Err(e) => {
                let _ = fs::remove_file(&data_temp).await;
                return Err(e);
            }
        };

        if let Err(e) = fs::rename(&sidecar_temp, &sidecar_path).await {
            let _ = fs::remove_file(&sidecar_temp).await;
            let _ = fs::remove_file(&data_temp).await;
            return Err(StorageError::Io(e));
        }

        if let Err(e) = fs::rename(&data_temp, path).await {
            let _ = fs::remove_file(&data_temp).await;
            Self::restore_sidecar(&sidecar_path, previous).await;
            return Err(StorageError::Io(e));
        }

        Ok(PutReceipt {
            version_id: Some(version_id),
        })
    }

    async fn restore_sidecar(sidecar_path: &Path, previous: Option<Vec<u8>>) {
        let restored = match previous {
            Some(raw) => match Self::stage(sidecar_path, &raw).await {
                Ok(temp) => fs::rename(&temp, sidecar_path)
                    .await
                    .map_err(StorageError::Io),
                Err(e) => Err(e),
            },
            None => fs::remove_file(sidecar_path)
                .await
                .map_err(StorageError::Io),
        };
        if let Err(e) = restored {
            tracing::warn!(
                path = %sidecar_path.display(),
                error = %e,
                "failed to restore metadata sidecar"
            );
        }
    }

    fn not_found_or_io(key: &str, e: std::io::Error) -> StorageError {
        if e.kind() == std::io::ErrorKind::NotFound {
            StorageError::NotFound(key.to_string())
        } else {
            StorageError::Io(e)
        }
    }
}

#[async_trait]
impl ObjectStore for FilesystemBackend {
    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let path = self.key_path(key).await?;
        match fs::metadata(&path).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn head(&self, key: &str) -> StorageResult<ObjectMeta> {
        let path = self.key_path(key).await?;
        let metadata = fs::metadata(&path)
            .await
            .map_err(|e| Self::not_found_or_io(key, e))?;
        if !metadata.is_file() {
            return Err(StorageError::NotFound(key.to_string()));
        }
        let sidecar = self.read_sidecar(key).await?;

        Ok(ObjectMeta {
            size: metadata.len(),
            last_modified: metadata.modified().ok().map(|t| t.into()),
            content_type: sidecar.content_type,
            version_id: sidecar.version_id,
            metadata: sidecar.metadata,
        })
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        let path = self.key_path(key).await?;
        let data = fs::read(&path)
            .await
            .map_err(|e| Self::not_found_or_io(key, e))?;
        Ok(Bytes::from(data))
    }

    #[instrument(skip(self, data, attributes), fields(backend = "filesystem", size = data.len()))]
    async fn put(
        &self,
        key: &str,
        data: Bytes,
        attributes: &ObjectAttributes,
    ) -> StorageResult<PutReceipt> {
        let path = self.key_path(key).await?;
        self.write_object(
            key,
            &path,
            &data,
            attributes.content_type.clone(),
            attributes.metadata.clone(),
        )
        .await
    }

    #[instrument(skip(self, attributes), fields(backend = "filesystem"))]
    async fn copy(
        &self,
        from: &str,
        to: &str,
        attributes: Option<&ObjectAttributes>,
    ) -> StorageResult<PutReceipt> {
        let from_path = self.key_path(from).await?;
        let to_path = self.key_path(to).await?;

        let data = fs::read(&from_path)
            .await
            .map_err(|e| Self::not_found_or_io(from, e))?;
        let (content_type, metadata) = match attributes {
            Some(attrs) => (attrs.content_type.clone(), attrs.metadata.clone()),
            None => {
                let source = self.read_sidecar(from).await?;
                (source.content_type, source.metadata)
            }
        };

        self.write_object(to, &to_path, &data, content_type, metadata)
            .await
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn delete(&self, key: &str) -> StorageResult<()> {
        let path = self.key_path(key).await?;
        fs::remove_file(&path)
            .await
            .map_err(|e| Self::not_found_or_io(key, e))?;
        match fs::remove_file(self.sidecar_path(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn list(&self, prefix: &str) -> StorageResult<Vec<ObjectSummary>> {
        // Walk the deepest directory named by the prefix, then filter by the
        // full string prefix, which gives S3 prefix semantics.
        let base_path = match prefix.rfind('/') {
            Some(idx) if idx > 0 => self.key_path(&prefix[..idx]).await?,
            _ => self.root.clone(),
        };
        let mut results = Vec::new();

        match fs::metadata(&base_path).await {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => return Ok(results),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(results),
            Err(e) => return Err(StorageError::Io(e)),
        }

        let meta_dir = self.root.join(META_DIR);
        let mut stack = vec![base_path];
        while let Some(dir) = stack.pop() {
            let mut entries = fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                // file_type() does not follow symlinks; symlinks are skipped.
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    if path != meta_dir {
                        stack.push(path);
                    }
                    continue;
                }
                if !file_type.is_file() {
                    continue;
                }
                let Ok(rel) = path.strip_prefix(&self.root) else {
                    continue;
                };
                let key = rel
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                if !key.starts_with(prefix) || key.contains(TEMP_MARKER) {
                    continue;
                }
                let metadata = entry.metadata().await?;
                results.push(ObjectSummary {
                    key,
                    size: metadata.len(),
                    last_modified: metadata.modified().ok().map(|t| t.into()),
                });
            }
        }

        results.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(results)
    }

    fn backend_name(&self) -> &'static str {
        "filesystem"
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn health_check(&self) -> StorageResult<()> {
        let metadata = fs::metadata(&self.root).await.map_err(|e| {
            StorageError::Io(std::io::Error::new(
                e.kind(),
                format!("storage root not accessible: {e}"),
            ))
        })?;

        if !metadata.is_dir() {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::NotADirectory,
                format!("storage root is not a directory: {:?}", self.root),
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sql_attributes(tag: &str) -> ObjectAttributes {
        let mut metadata = BTreeMap::new();
        metadata.insert("sha256".to_string(), tag.to_string());
        ObjectAttributes::new("application/sql", metadata)
    }

    #[tokio::test]
    async fn test_put_get_head_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new(dir.path()).await.unwrap();

        let data = Bytes::from("CREATE TABLE t();");
        let receipt = backend
            .put("init_db/a.sql", data.clone(), &sql_attributes("aa"))
            .await
            .unwrap();
        assert!(receipt.version_id.is_some());

        assert_eq!(backend.get("init_db/a.sql").await.unwrap(), data);
        let meta = backend.head("init_db/a.sql").await.unwrap();
        assert_eq!(meta.size, data.len() as u64);
        assert_eq!(meta.content_type.as_deref(), Some("application/sql"));
        assert_eq!(meta.metadata["sha256"], "aa");
        assert_eq!(meta.version_id, receipt.version_id);
    }

    #[tokio::test]
    async fn test_copy_replaces_or_keeps_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new(dir.path()).await.unwrap();

        backend
            .put("src.sql", Bytes::from("one"), &sql_attributes("src"))
            .await
            .unwrap();
        backend
            .put("alias.sql", Bytes::from("old"), &sql_attributes("old"))
            .await
            .unwrap();

        backend
            .copy("src.sql", "alias.sql", Some(&sql_attributes("new")))
            .await
            .unwrap();
        assert_eq!(backend.get("alias.sql").await.unwrap(), Bytes::from("one"));
        assert_eq!(
            backend.head("alias.sql").await.unwrap().metadata["sha256"],
            "new"
        );

        backend.copy("src.sql", "kept.sql", None).await.unwrap();
        assert_eq!(
            backend.head("kept.sql").await.unwrap().metadata["sha256"],
            "src"
        );
    }

    #[tokio::test]
    async fn test_failed_data_rename_restores_previous_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new(dir.path()).await.unwrap();
        backend
            .put("alias.sql", Bytes::from("old"), &sql_attributes("old"))
            .await
            .unwrap();
        backend
            .put("src.sql", Bytes::from("new"), &sql_attributes("new"))
            .await
            .unwrap();
        let sidecar = dir.path().join(META_DIR).join("alias.sql.json");
        let before = std::fs::read(&sidecar).unwrap();

        // A non-empty directory where the data file lands makes the final
        // rename fail after the new sidecar is already in place.
        std::fs::remove_file(dir.path().join("alias.sql")).unwrap();
        std::fs::create_dir_all(dir.path().join("alias.sql/inner")).unwrap();

        let result = backend
            .copy("src.sql", "alias.sql", Some(&sql_attributes("new")))
            .await;
        assert!(result.is_err());
        assert_eq!(std::fs::read(&sidecar).unwrap(), before);

        backend
            .copy("src.sql", "fresh.sql", Some(&sql_attributes("new")))
            .await
            .unwrap();
        std::fs::create_dir_all(dir.path().join("blocked.sql/inner")).unwrap();
        assert!(backend.copy("src.sql", "blocked.sql", None).await.is_err());
        assert!(!dir.path().join(META_DIR).join("blocked.sql.json").exists());
    }

    #[tokio::test]
    async fn test_list_hides_sidecars_and_filters_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new(dir.path()).await.unwrap();
        let attrs = ObjectAttributes::default();

        for key in ["init_db/b.sql", "init_db/a.sql", "init_dbx/c.sql", "other.sql"] {
            backend.put(key, Bytes::from("x"), &attrs).await.unwrap();
        }

        let keys: Vec<String> = backend
            .list("init_db/")
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.key)
            .collect();
        assert_eq!(keys, vec!["init_db/a.sql", "init_db/b.sql"]);

        let all = backend.list("").await.unwrap();
        assert_eq!(all.len(), 4);
        assert!(all.iter().all(|s| !s.key.starts_with(META_DIR)));

        let partial: Vec<String> = backend
            .list("init_db")
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.key)
            .collect();
        assert_eq!(partial.len(), 3);

        assert!(backend.list("missing/").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_head_without_sidecar_has_empty_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new(dir.path()).await.unwrap();
        std::fs::create_dir_all(dir.path().join("init_db")).unwrap();
        std::fs::write(dir.path().join("init_db/raw.sql"), b"select 1;").unwrap();

        let meta = backend.head("init_db/raw.sql").await.unwrap();
        assert_eq!(meta.size, 9);
        assert!(meta.metadata.is_empty());
        assert!(meta.version_id.is_none());
    }

    #[tokio::test]
    async fn test_delete_removes_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new(dir.path()).await.unwrap();
        backend
            .put("k.sql", Bytes::from("x"), &sql_attributes("x"))
            .await
            .unwrap();
        backend.delete("k.sql").await.unwrap();
        assert!(!backend.exists("k.sql").await.unwrap());
        assert!(!dir.path().join(META_DIR).join("k.sql.json").exists());
        assert!(matches!(
            backend.delete("k.sql").await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_object_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new(dir.path()).await.unwrap();
        assert!(backend.get("nope").await.unwrap_err().is_not_found());
        assert!(backend.head("nope").await.unwrap_err().is_not_found());
        assert!(
            backend
                .copy("nope", "dst", None)
                .await
                .unwrap_err()
                .is_not_found()
        );
    }

    #[tokio::test]
    async fn test_reserved_and_traversal_keys_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new(dir.path()).await.unwrap();

        assert!(backend.exists("../escape").await.is_err());
        assert!(backend.exists("/absolute/path").await.is_err());
        assert!(backend.exists("foo/../bar").await.is_err());
        assert!(backend.exists(".ferry-meta/k.sql.json").await.is_err());
        assert!(backend.exists("a.sql.tmp.123").await.is_err());
        assert!(backend.exists("").await.is_err());

        assert!(backend.exists("valid/nested/key").await.is_ok());
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_symlink_traversal_rejected() {
        use std::os::unix::fs::symlink;

        let dir = tempfile::tempdir().unwrap();
        let outside_dir = tempfile::tempdir().unwrap();
        let outside_file = outside_dir.path().join("secret.sql");
        std::fs::write(&outside_file, "secret data").unwrap();

        let backend = FilesystemBackend::new(dir.path()).await.unwrap();
        symlink(&outside_file, dir.path().join("malicious_link")).unwrap();

        match backend.get("malicious_link").await {
            Err(StorageError::InvalidKey(msg)) => {
                assert!(msg.contains("escapes storage root"), "{msg}")
            }
            other => panic!("expected InvalidKey error, got: {other:?}"),
        }

        symlink(outside_dir.path(), dir.path().join("escape")).unwrap();
        let result = backend
            .put(
                "escape/nested/deep/file.sql",
                Bytes::from("data"),
                &ObjectAttributes::default(),
            )
            .await;
        assert!(matches!(result, Err(StorageError::InvalidKey(_))));
        assert!(!outside_dir.path().join("nested").exists());
    }
}
