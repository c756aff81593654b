//! Publishing artifacts under immutable versioned keys plus a mutable alias.

use crate::error::{PublishError, PublishResult};
use crate::identity::IdentityProvider;
use async_stream::try_stream;
use ferry_core::config::PublishConfig;
use ferry_core::{
    Artifact, ArtifactMetadata, Fingerprint, VersionStamp, VersionedEntry, VersionedKeyScheme,
};
use ferry_storage::{ObjectAttributes, ObjectStore};
use futures::{Stream, TryStreamExt};
use std::collections::BTreeMap;
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::{info, instrument, warn};

/// Upper bound on sequence suffixes probed within one second.
const MAX_SEQUENCE: u32 = 1000;

/// Outcome of a retention pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PruneReport {
    /// Retention applied, `None` when unset (nothing is deleted).
    pub retention_days: Option<u32>,
    /// Keys deleted, or that would be deleted in a dry run.
    pub deleted: Vec<String>,
    /// Versioned entries kept.
    pub retained: usize,
    /// Expired entry kept because the alias mirrors it.
    pub protected: Option<String>,
    pub dry_run: bool,
}

/// Publishes artifacts to an object store.
pub struct Publisher {
    store: Arc<dyn ObjectStore>,
    identity: Arc<dyn IdentityProvider>,
    scheme: VersionedKeyScheme,
    alias_key: String,
    content_type: String,
    extra_metadata: BTreeMap<String, String>,
    retention_days: Option<u32>,
}

impl std::fmt::Debug for Publisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("backend", &self.store.backend_name())
            .field("scheme", &self.scheme)
            .field("alias_key", &self.alias_key)
            .finish_non_exhaustive()
    }
}

impl Publisher {
    /// Create a publisher from validated configuration.
    pub fn new(
        store: Arc<dyn ObjectStore>,
        identity: Arc<dyn IdentityProvider>,
        config: &PublishConfig,
    ) -> PublishResult<Self> {
        config.validate().map_err(PublishError::Config)?;
        Ok(Self {
            store,
            identity,
            scheme: config.key_scheme()?,
            alias_key: config.alias_key.clone(),
            content_type: config.content_type.clone(),
            extra_metadata: config.extra_metadata.clone(),
            retention_days: config.retention_days,
        })
    }

    /// The alias key consumers fetch from.
    pub fn alias_key(&self) -> &str {
        &self.alias_key
    }

    /// The versioned key scheme.
    pub fn scheme(&self) -> &VersionedKeyScheme {
        &self.scheme
    }

    /// Publish an artifact now.
    pub async fn publish(&self, artifact: &Artifact) -> PublishResult<VersionedEntry> {
        self.publish_at(artifact, OffsetDateTime::now_utc()).await
    }

    /// Publish an artifact as if at `now`.
    ///
    /// Writes the versioned key first and repoints the alias only after that
    /// write succeeded. A failure at any step returns immediately.
    #[instrument(skip(self, artifact), fields(fingerprint = %artifact.fingerprint(), size = artifact.size()))]
    pub async fn publish_at(
        &self,
        artifact: &Artifact,
        now: OffsetDateTime,
    ) -> PublishResult<VersionedEntry> {
        let principal = self.identity.current_principal().await?;
        let (key, stamp) = self.free_key(VersionStamp::at(now)).await?;

        let metadata = ArtifactMetadata {
            fingerprint: artifact.fingerprint(),
            secondary: Some(artifact.secondary_digest()),
            uploaded_by: principal.clone(),
            uploaded_at: stamp.published_at,
            content_type: self.content_type.clone(),
            extra: self.extra_metadata.clone(),
        };
        let attributes = ObjectAttributes::new(self.content_type.clone(), metadata.to_map()?);

        let receipt = self
            .store
            .put(&key, artifact.bytes().clone(), &attributes)
            .await?;
        info!(key = %key, version_id = ?receipt.version_id, "stored versioned artifact");

        self.store
            .copy(&key, &self.alias_key, Some(&attributes))
            .await?;
        info!(alias = %self.alias_key, source = %key, "alias updated");

        let version_id = match receipt.version_id {
            Some(id) => Some(id),
            None => self.store.head(&key).await?.version_id,
        };

        Ok(VersionedEntry {
            key,
            stamp,
            size: artifact.size(),
            fingerprint: Some(artifact.fingerprint()),
            uploaded_by: Some(principal),
            version_id,
        })
    }

    /// First unused key for the stamp's second.
    async fn free_key(&self, stamp: VersionStamp) -> PublishResult<(String, VersionStamp)> {
        for sequence in 0..MAX_SEQUENCE {
            let candidate = stamp.with_sequence(sequence);
            let key = self.scheme.key_for(&candidate)?;
            if !self.store.exists(&key).await? {
                return Ok((key, candidate));
            }
        }
        Err(PublishError::KeyExhausted {
            key: self.scheme.key_for(&stamp)?,
            attempts: MAX_SEQUENCE,
        })
    }

    /// Stream every versioned entry in creation order.
    ///
    /// The alias and objects outside the key scheme are skipped. An entry
    /// without readable fingerprint metadata is still yielded, with
    /// `fingerprint: None`. Each call enumerates from scratch.
    pub fn list_versions(
        &self,
    ) -> impl Stream<Item = PublishResult<VersionedEntry>> + Send + '_ {
        try_stream! {
            let mut stamped: Vec<(VersionStamp, String)> = self
                .store
                .list(&self.scheme.list_prefix())
                .await?
                .into_iter()
                .filter_map(|summary| {
                    self.scheme
                        .parse(&summary.key)
                        .map(|stamp| (stamp, summary.key))
                })
                .collect();
            stamped.sort();

            for (stamp, key) in stamped {
                let meta = match self.store.head(&key).await {
                    Ok(meta) => meta,
                    // Deleted since the listing.
                    Err(e) if e.is_not_found() => continue,
                    Err(e) => Err(e)?,
                };
                let fingerprint = ArtifactMetadata::fingerprint_from_map(&meta.metadata);
                if fingerprint.is_none() {
                    warn!(key = %key, "versioned entry has no readable fingerprint metadata");
                }
                yield VersionedEntry {
                    uploaded_by: ArtifactMetadata::uploaded_by_from_map(&meta.metadata),
                    key,
                    stamp,
                    size: meta.size,
                    fingerprint,
                    version_id: meta.version_id,
                };
            }
        }
    }

    /// Collect [`Self::list_versions`].
    pub async fn versions(&self) -> PublishResult<Vec<VersionedEntry>> {
        self.list_versions().try_collect().await
    }

    /// Metadata of the alias, from which the expected fingerprint can be
    /// re-derived without any other record.
    pub async fn alias_metadata(&self) -> PublishResult<ArtifactMetadata> {
        let meta = self.store.head(&self.alias_key).await?;
        Ok(ArtifactMetadata::from_map(&meta.metadata)?)
    }

    /// Apply the retention policy now.
    pub async fn prune(
        &self,
        retention_days: Option<u32>,
        dry_run: bool,
    ) -> PublishResult<PruneReport> {
        self.prune_at(retention_days, dry_run, OffsetDateTime::now_utc())
            .await
    }

    /// Delete versioned entries older than the retention window at `now`.
    ///
    /// `retention_days` overrides the configured value. The alias and the
    /// entry it mirrors are never deleted; with no retention nothing is.
    #[instrument(skip(self))]
    pub async fn prune_at(
        &self,
        retention_days: Option<u32>,
        dry_run: bool,
        now: OffsetDateTime,
    ) -> PublishResult<PruneReport> {
        let retention = retention_days.or(self.retention_days);
        let mut report = PruneReport {
            retention_days: retention,
            dry_run,
            ..PruneReport::default()
        };
        let Some(days) = retention else {
            info!("retention not configured, nothing pruned");
            return Ok(report);
        };
        if days == 0 {
            return Err(PublishError::Config(
                "retention_days must be at least 1".to_string(),
            ));
        }
        let cutoff = now - time::Duration::days(i64::from(days));

        let entries = self.versions().await?;
        let mirror = self.alias_mirror(&entries).await?;

        for entry in entries {
            if entry.stamp.published_at >= cutoff {
                report.retained += 1;
                continue;
            }
            if mirror.as_deref() == Some(entry.key.as_str()) {
                report.retained += 1;
                report.protected = Some(entry.key);
                continue;
            }
            if !dry_run {
                match self.store.delete(&entry.key).await {
                    Ok(()) => {}
                    Err(e) if e.is_not_found() => {}
                    Err(e) => return Err(e.into()),
                }
            }
            info!(key = %entry.key, dry_run, "pruned versioned entry");
            report.deleted.push(entry.key);
        }

        Ok(report)
    }

    /// Key of the versioned entry the alias currently mirrors.
    ///
    /// Matched on fingerprint and publish time. When the alias exists but its
    /// metadata is unreadable, the newest entry is treated as the mirror.
    async fn alias_mirror(&self, entries: &[VersionedEntry]) -> PublishResult<Option<String>> {
        let alias = match self.alias_metadata().await {
            Ok(alias) => alias,
            Err(PublishError::Storage(e)) if e.is_not_found() => return Ok(None),
            Err(PublishError::Core(e)) => {
                warn!(alias = %self.alias_key, error = %e, "alias metadata unreadable, keeping newest entry");
                return Ok(entries.last().map(|e| e.key.clone()));
            }
            Err(e) => return Err(e),
        };
        let matches = |entry: &&VersionedEntry, fingerprint: &Fingerprint| {
            entry.fingerprint.as_ref() == Some(fingerprint)
                && entry.stamp.published_at == alias.uploaded_at
        };
        Ok(entries
            .iter()
            .rev()
            .find(|entry| matches(entry, &alias.fingerprint))
            .map(|entry| entry.key.clone()))
    }
}
