mod common;

use bytes::Bytes;
use common::fixtures::PRINCIPAL;
use common::{FailingStore, FailureMode, publisher, publisher_with};
use ferry_core::config::PublishConfig;
use ferry_core::{Artifact, ArtifactMetadata, Fingerprint, SecondaryDigest};
use ferry_publish::PublishError;
use ferry_storage::{FilesystemBackend, MemoryBackend, ObjectAttributes, ObjectStore};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use time::macros::datetime;

#[tokio::test]
async fn test_publish_then_alias_returns_same_bytes() {
    let store = Arc::new(MemoryBackend::new());
    let publisher = publisher(store.clone());
    let artifact = Artifact::new(&b"CREATE TABLE t();"[..]);

    let entry = publisher
        .publish_at(&artifact, datetime!(2026-10-16 10:15:00.250 UTC))
        .await
        .unwrap();

    assert_eq!(entry.key, "init_db/init_db_20261016_101500.sql");
    assert_eq!(entry.fingerprint, Some(artifact.fingerprint()));
    assert_eq!(entry.uploaded_by.as_deref(), Some(PRINCIPAL));
    assert!(entry.version_id.is_some());

    let alias = store.get("init_db/latest.sql").await.unwrap();
    assert_eq!(alias, artifact.bytes().clone());
    assert_eq!(Fingerprint::compute(&alias), artifact.fingerprint());
}

#[tokio::test]
async fn test_alias_metadata_yields_expected_fingerprint() {
    let store = Arc::new(MemoryBackend::new());
    let mut config = PublishConfig::default();
    config
        .extra_metadata
        .insert("db-name".to_string(), "majestic".to_string());
    let publisher = publisher_with(store.clone(), config);
    let artifact = Artifact::new(&b"CREATE TABLE t();"[..]);

    publisher.publish(&artifact).await.unwrap();

    let meta = publisher.alias_metadata().await.unwrap();
    assert_eq!(meta.fingerprint, artifact.fingerprint());
    assert_eq!(
        meta.secondary,
        Some(SecondaryDigest::compute(b"CREATE TABLE t();"))
    );
    assert_eq!(meta.uploaded_by, PRINCIPAL);
    assert_eq!(meta.content_type, "application/sql");
    assert_eq!(meta.extra["db-name"], "majestic");

    // The versioned object carries identical tags.
    let entry = &publisher.versions().await.unwrap()[0];
    let versioned = store.head(&entry.key).await.unwrap();
    assert_eq!(ArtifactMetadata::from_map(&versioned.metadata).unwrap(), meta);
}

#[tokio::test]
async fn test_failed_versioned_put_leaves_alias_untouched() {
    let inner = Arc::new(MemoryBackend::new());
    inner
        .put(
            "init_db/latest.sql",
            Bytes::from_static(b"previous release"),
            &ObjectAttributes::default(),
        )
        .await
        .unwrap();
    let store = FailingStore::new(inner.clone(), FailureMode::Put);
    let publisher = publisher(store.clone());

    let err = publisher
        .publish(&Artifact::new(&b"CREATE TABLE t();"[..]))
        .await
        .unwrap_err();

    assert!(matches!(err, PublishError::Storage(_)), "{err:?}");
    assert_eq!(store.copies.load(Ordering::SeqCst), 0, "alias must not be touched");
    assert_eq!(
        inner.get("init_db/latest.sql").await.unwrap(),
        Bytes::from_static(b"previous release")
    );
}

#[tokio::test]
async fn test_failed_alias_copy_is_a_storage_error() {
    let inner = Arc::new(MemoryBackend::new());
    let store = FailingStore::new(inner.clone(), FailureMode::Copy);
    let publisher = publisher(store.clone());

    let err = publisher
        .publish(&Artifact::new(&b"select 1;"[..]))
        .await
        .unwrap_err();

    assert!(matches!(err, PublishError::Storage(_)));
    assert!(!inner.exists("init_db/latest.sql").await.unwrap());
    // The immutable version stays; a later publish repoints the alias.
    assert_eq!(publisher.versions().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_republish_identical_bytes_creates_new_entry() {
    let store = Arc::new(MemoryBackend::new());
    let publisher = publisher(store.clone());
    let artifact = Artifact::new(&b"CREATE TABLE t();"[..]);

    let first = publisher
        .publish_at(&artifact, datetime!(2026-10-16 10:15:00 UTC))
        .await
        .unwrap();
    let second = publisher
        .publish_at(&artifact, datetime!(2026-10-16 11:00:00 UTC))
        .await
        .unwrap();

    assert_ne!(first.key, second.key);
    assert_eq!(first.fingerprint, second.fingerprint);
    assert_eq!(publisher.versions().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_same_second_publishes_never_overwrite() {
    let store = Arc::new(MemoryBackend::new());
    let publisher = publisher(store.clone());
    let at = datetime!(2026-10-16 10:15:00 UTC);

    let a = publisher
        .publish_at(&Artifact::new(&b"one"[..]), at)
        .await
        .unwrap();
    let b = publisher
        .publish_at(&Artifact::new(&b"two"[..]), at)
        .await
        .unwrap();
    let c = publisher
        .publish_at(&Artifact::new(&b"three"[..]), at)
        .await
        .unwrap();

    assert_eq!(a.key, "init_db/init_db_20261016_101500.sql");
    assert_eq!(b.key, "init_db/init_db_20261016_101500_1.sql");
    assert_eq!(c.key, "init_db/init_db_20261016_101500_2.sql");
    assert_eq!(store.get(&a.key).await.unwrap(), Bytes::from_static(b"one"));
    assert_eq!(
        store.get("init_db/latest.sql").await.unwrap(),
        Bytes::from_static(b"three")
    );

    let keys: Vec<String> = publisher
        .versions()
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.key)
        .collect();
    assert_eq!(keys, vec![a.key, b.key, c.key]);
}

#[tokio::test]
async fn test_list_versions_skips_alias_and_tolerates_missing_metadata() {
    let store = Arc::new(MemoryBackend::new());
    let publisher = publisher(store.clone());

    publisher
        .publish_at(
            &Artifact::new(&b"v2"[..]),
            datetime!(2026-10-16 12:00:00 UTC),
        )
        .await
        .unwrap();
    publisher
        .publish_at(
            &Artifact::new(&b"v1"[..]),
            datetime!(2026-10-15 12:00:00 UTC),
        )
        .await
        .unwrap();
    // Uploaded by hand without metadata.
    store
        .put(
            "init_db/init_db_20261014_000000.sql",
            Bytes::from_static(b"manual"),
            &ObjectAttributes::default(),
        )
        .await
        .unwrap();
    // Foreign object under the prefix.
    store
        .put(
            "init_db/README.txt",
            Bytes::from_static(b"notes"),
            &ObjectAttributes::default(),
        )
        .await
        .unwrap();

    let entries = publisher.versions().await.unwrap();
    let keys: Vec<&str> = entries.iter().map(|e| e.key.as_str()).collect();
    assert_eq!(
        keys,
        vec![
            "init_db/init_db_20261014_000000.sql",
            "init_db/init_db_20261015_120000.sql",
            "init_db/init_db_20261016_120000.sql",
        ]
    );
    assert_eq!(entries[0].fingerprint, None);
    assert_eq!(entries[0].size, 6);
    assert_eq!(entries[1].fingerprint, Some(Fingerprint::compute(b"v1")));
    assert_eq!(entries[2].fingerprint, Some(Fingerprint::compute(b"v2")));
}

#[tokio::test]
async fn test_prune_without_retention_deletes_nothing() {
    let store = Arc::new(MemoryBackend::new());
    let publisher = publisher(store.clone());
    publisher
        .publish_at(&Artifact::new(&b"old"[..]), datetime!(2020-01-01 00:00:00 UTC))
        .await
        .unwrap();

    let report = publisher
        .prune_at(None, false, datetime!(2026-10-16 00:00:00 UTC))
        .await
        .unwrap();
    assert_eq!(report.retention_days, None);
    assert!(report.deleted.is_empty());
    assert_eq!(publisher.versions().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_prune_keeps_alias_mirror_and_recent_entries() {
    let store = Arc::new(MemoryBackend::new());
    let config = PublishConfig {
        retention_days: Some(7),
        ..PublishConfig::default()
    };
    let publisher = publisher_with(store.clone(), config);
    let now = datetime!(2026-10-16 00:00:00 UTC);

    publisher
        .publish_at(&Artifact::new(&b"a"[..]), datetime!(2026-09-01 00:00:00 UTC))
        .await
        .unwrap();
    publisher
        .publish_at(&Artifact::new(&b"b"[..]), datetime!(2026-10-12 00:00:00 UTC))
        .await
        .unwrap();
    // Published last but with the oldest stamp, so the alias mirrors an
    // expired entry.
    let mirrored = publisher
        .publish_at(&Artifact::new(&b"c"[..]), datetime!(2026-08-01 00:00:00 UTC))
        .await
        .unwrap();

    let dry = publisher.prune_at(None, true, now).await.unwrap();
    assert_eq!(dry.deleted, vec!["init_db/init_db_20260901_000000.sql"]);
    assert_eq!(dry.protected.as_deref(), Some(mirrored.key.as_str()));
    assert_eq!(publisher.versions().await.unwrap().len(), 3, "dry run deletes nothing");

    let report = publisher.prune_at(None, false, now).await.unwrap();
    assert_eq!(report.deleted, dry.deleted);
    assert_eq!(report.retained, 2);
    assert!(store.exists("init_db/latest.sql").await.unwrap());
    assert!(store.exists(&mirrored.key).await.unwrap());
    assert_eq!(publisher.versions().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_prune_override_retention() {
    let store = Arc::new(MemoryBackend::new());
    let publisher = publisher(store.clone());
    publisher
        .publish_at(&Artifact::new(&b"a"[..]), datetime!(2026-10-01 00:00:00 UTC))
        .await
        .unwrap();
    publisher
        .publish_at(&Artifact::new(&b"b"[..]), datetime!(2026-10-15 00:00:00 UTC))
        .await
        .unwrap();

    let report = publisher
        .prune_at(Some(3), false, datetime!(2026-10-16 00:00:00 UTC))
        .await
        .unwrap();
    assert_eq!(report.deleted, vec!["init_db/init_db_20261001_000000.sql"]);
    assert_eq!(report.protected, None);
}

#[tokio::test]
async fn test_reserved_extra_metadata_fails_before_any_write() {
    let store = Arc::new(MemoryBackend::new());
    let mut config = PublishConfig::default();
    config
        .extra_metadata
        .insert("sha256".to_string(), "spoofed".to_string());
    let publisher = publisher_with(store.clone(), config);

    let err = publisher
        .publish(&Artifact::new(&b"x"[..]))
        .await
        .unwrap_err();
    assert!(matches!(err, PublishError::Core(_)));
    assert!(store.is_empty());
}

#[tokio::test]
async fn test_publish_on_filesystem_backend() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FilesystemBackend::new(dir.path()).await.unwrap());
    let publisher = publisher(store.clone());
    let artifact = Artifact::new(&b"CREATE TABLE t();"[..]);

    let entry = publisher.publish(&artifact).await.unwrap();

    assert!(dir.path().join(&entry.key).exists());
    assert_eq!(
        std::fs::read(dir.path().join("init_db/latest.sql")).unwrap(),
        b"CREATE TABLE t();"
    );
    assert_eq!(
        publisher.alias_metadata().await.unwrap().fingerprint,
        artifact.fingerprint()
    );
}
