//! Host-side commands: descriptor generation, script rendering and the native
//! bootstrap run.

use crate::artifacts;
use anyhow::{Context, Result};
use ferry_bootstrap::{ApplyReport, BootstrapOutcome, Bootstrapper, CompletionMarker};
use ferry_core::{AppConfig, BootstrapDescriptor, Fingerprint};
use std::path::Path;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Where the expected fingerprint of a generated descriptor comes from.
pub enum FingerprintSource {
    Explicit(String),
    FromAlias,
}

/// Build and validate a descriptor from configuration.
pub async fn build_descriptor(
    config: &AppConfig,
    source: FingerprintSource,
) -> Result<BootstrapDescriptor> {
    let fingerprint = match source {
        FingerprintSource::Explicit(hex) => {
            Fingerprint::from_hex(&hex).context("invalid --fingerprint")?
        }
        FingerprintSource::FromAlias => artifacts::alias_fingerprint(config).await?,
    };
    let descriptor = BootstrapDescriptor::new(
        config.publish.alias_key.clone(),
        fingerprint,
        &config.storage,
        &config.bootstrap,
    );
    descriptor
        .validate()
        .context("configuration does not produce a usable descriptor")?;
    Ok(descriptor)
}

/// Read a descriptor file.
pub fn read_descriptor(path: &Path) -> Result<BootstrapDescriptor> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read descriptor {}", path.display()))?;
    BootstrapDescriptor::from_toml(&text)
        .with_context(|| format!("invalid descriptor {}", path.display()))
}

/// Emit the descriptor as TOML.
pub fn descriptor(descriptor: &BootstrapDescriptor, output: Option<&Path>) -> Result<()> {
    let text = descriptor.to_toml()?;
    match output {
        Some(path) => {
            std::fs::write(path, text)
                .with_context(|| format!("failed to write {}", path.display()))?;
            eprintln!("wrote descriptor to {}", path.display());
        }
        None => print!("{text}"),
    }
    Ok(())
}

/// Emit the bootstrap script, or its base64 user-data form.
pub fn render(descriptor: &BootstrapDescriptor, output: Option<&Path>, base64: bool) -> Result<()> {
    let text = if base64 {
        let mut encoded = ferry_bootstrap::render_user_data(descriptor)?;
        encoded.push('\n');
        encoded
    } else {
        ferry_bootstrap::render_bootstrap(descriptor)?
    };

    let Some(path) = output else {
        print!("{text}");
        return Ok(());
    };
    std::fs::write(path, &text).with_context(|| format!("failed to write {}", path.display()))?;
    if !base64 {
        make_executable(path)?;
    }
    eprintln!("wrote bootstrap script to {}", path.display());
    Ok(())
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
        .with_context(|| format!("failed to set permissions on {}", path.display()))
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<()> {
    Ok(())
}

/// Run the state machine to completion.
pub async fn run(descriptor: BootstrapDescriptor) -> Result<()> {
    let bootstrapper = Bootstrapper::from_descriptor(descriptor).await?;
    match bootstrapper.run().await? {
        BootstrapOutcome::AlreadyComplete { marked_at } => {
            println!(
                "already complete (marker {}{})",
                bootstrapper.marker().path().display(),
                marked_at.map(|at| format!(", written {}", stamp(at))).unwrap_or_default()
            );
        }
        BootstrapOutcome::Applied {
            fingerprint,
            marked_at,
            ledger,
        } => {
            println!("applied {fingerprint} at {}", stamp(marked_at));
            match ledger {
                ApplyReport::Applied {
                    table_count: Some(count),
                } => println!("tables in database: {count}"),
                ApplyReport::Applied { table_count: None } => {}
                ApplyReport::AlreadyApplied {
                    applied_at,
                    applied_by,
                } => println!(
                    "database already held this artifact (applied by {applied_by} at {})",
                    stamp(applied_at)
                ),
                ApplyReport::Command { program } => println!("applied with {program}"),
            }
        }
    }
    Ok(())
}

/// Report whether the completion marker is present.
pub async fn status(descriptor: &BootstrapDescriptor) -> Result<()> {
    let marker = CompletionMarker::new(&descriptor.paths.marker);
    let state = marker
        .read()
        .await
        .with_context(|| format!("failed to read marker {}", marker.path().display()))?;
    match state {
        Some(state) => println!(
            "complete: {} ({})",
            marker.path().display(),
            state
                .marked_at
                .map(stamp)
                .unwrap_or_else(|| "timestamp unreadable".to_string())
        ),
        None => println!("pending: no marker at {}", marker.path().display()),
    }
    Ok(())
}

/// Remove the completion marker so the next run applies again.
pub async fn reset(descriptor: &BootstrapDescriptor) -> Result<()> {
    let marker = CompletionMarker::new(&descriptor.paths.marker);
    let removed = marker
        .clear()
        .await
        .with_context(|| format!("failed to remove marker {}", marker.path().display()))?;
    if removed {
        println!("removed marker {}", marker.path().display());
    } else {
        println!("no marker at {}", marker.path().display());
    }
    Ok(())
}

fn stamp(at: OffsetDateTime) -> String {
    at.format(&Rfc3339).unwrap_or_else(|_| at.to_string())
}
