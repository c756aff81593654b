//! Publisher-side commands: publish, versions, alias, prune.

use anyhow::{Context, Result};
use ferry_core::{AppConfig, Artifact, ArtifactMetadata, Fingerprint, VersionedEntry};
use ferry_publish::{Publisher, identity};
use ferry_storage::ObjectStore;
use futures::TryStreamExt;
use std::path::Path;
use std::sync::Arc;
use time::format_description::well_known::Rfc3339;

async fn store(config: &AppConfig) -> Result<Arc<dyn ObjectStore>> {
    ferry_storage::from_config(&config.storage)
        .await
        .context("failed to initialize storage")
}

async fn publisher(config: &AppConfig) -> Result<Publisher> {
    let store = store(config).await?;
    let identity = identity::from_config(&config.publish.identity, &config.storage).await;
    Ok(Publisher::new(store, identity, &config.publish)?)
}

/// Publish a file and print what was written.
pub async fn publish(config: &AppConfig, file: &Path) -> Result<()> {
    let artifact =
        Artifact::read(file).with_context(|| format!("failed to read {}", file.display()))?;
    let publisher = publisher(config).await?;
    let entry = publisher.publish(&artifact).await?;

    println!("published   {}", entry.key);
    println!("alias       {}", publisher.alias_key());
    println!("sha256      {}", artifact.fingerprint());
    println!("md5         {}", artifact.secondary_digest());
    println!("size        {}", entry.size);
    println!("version-id  {}", entry.version_id.as_deref().unwrap_or("-"));
    println!("uploaded-by {}", entry.uploaded_by.as_deref().unwrap_or("-"));
    Ok(())
}

/// List versioned entries oldest first.
pub async fn versions(config: &AppConfig) -> Result<()> {
    let publisher = publisher(config).await?;
    let entries = publisher.list_versions();
    futures::pin_mut!(entries);

    let mut count = 0usize;
    while let Some(entry) = entries.try_next().await? {
        print_entry(&entry);
        count += 1;
    }
    if count == 0 {
        println!("no versions published under {}", publisher.scheme().prefix());
    }
    Ok(())
}

/// Show the metadata of the alias.
pub async fn alias(config: &AppConfig) -> Result<()> {
    let meta = alias_metadata(config).await?;
    println!("alias        {}", config.publish.alias_key);
    println!("sha256       {}", meta.fingerprint);
    if let Some(md5) = meta.secondary {
        println!("md5          {md5}");
    }
    println!("uploaded-by  {}", meta.uploaded_by);
    println!(
        "uploaded-at  {}",
        meta.uploaded_at.format(&Rfc3339).unwrap_or_default()
    );
    println!("content-type {}", meta.content_type);
    for (key, value) in &meta.extra {
        println!("{key:<12} {value}");
    }
    Ok(())
}

/// Apply the retention policy.
pub async fn prune(config: &AppConfig, retention_days: Option<u32>, dry_run: bool) -> Result<()> {
    let publisher = publisher(config).await?;
    let report = publisher.prune(retention_days, dry_run).await?;

    let Some(days) = report.retention_days else {
        println!("retention not configured; nothing pruned");
        return Ok(());
    };
    let verb = if dry_run { "would delete" } else { "deleted" };
    for key in &report.deleted {
        println!("{verb} {key}");
    }
    if let Some(key) = &report.protected {
        println!("kept {key} (mirrored by alias)");
    }
    println!(
        "{} {verb}, {} retained (retention {days} days)",
        report.deleted.len(),
        report.retained
    );
    Ok(())
}

/// Metadata carried by the alias object.
pub async fn alias_metadata(config: &AppConfig) -> Result<ArtifactMetadata> {
    let publisher = publisher(config).await?;
    publisher
        .alias_metadata()
        .await
        .with_context(|| format!("failed to read alias {}", publisher.alias_key()))
}

/// Expected fingerprint as recorded on the alias.
pub async fn alias_fingerprint(config: &AppConfig) -> Result<Fingerprint> {
    Ok(alias_metadata(config).await?.fingerprint)
}

fn print_entry(entry: &VersionedEntry) {
    let at = entry
        .stamp
        .published_at
        .format(&Rfc3339)
        .unwrap_or_default();
    println!(
        "{at}  {entry}  by={}  version={}",
        entry.uploaded_by.as_deref().unwrap_or("-"),
        entry.version_id.as_deref().unwrap_or("-"),
    );
}
