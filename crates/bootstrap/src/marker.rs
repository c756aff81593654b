//! Host-local completion marker.
//!
//! The marker holds a single RFC 3339 line with the completion time. Its
//! presence alone gates re-execution; an unparsable body still counts as
//! complete.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::io::AsyncWriteExt;

/// Completion marker at a fixed path.
#[derive(Clone, Debug)]
pub struct CompletionMarker {
    path: PathBuf,
}

/// What an existing marker records.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MarkerState {
    /// Completion time, when the body parses.
    pub marked_at: Option<OffsetDateTime>,
}

impl CompletionMarker {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the marker, `None` when absent.
    pub async fn read(&self) -> std::io::Result<Option<MarkerState>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => {
                let body = String::from_utf8_lossy(&bytes);
                let marked_at = body
                    .lines()
                    .next()
                    .and_then(|line| OffsetDateTime::parse(line.trim(), &Rfc3339).ok());
                Ok(Some(MarkerState { marked_at }))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Atomically write the marker with completion time `at`.
    pub async fn write(&self, at: OffsetDateTime) -> std::io::Result<()> {
        let line = at
            .format(&Rfc3339)
            .map_err(|e| std::io::Error::new(ErrorKind::InvalidData, e))?;

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut temp = self.path.clone().into_os_string();
        temp.push(".tmp");
        let temp = PathBuf::from(temp);

        let mut file = tokio::fs::File::create(&temp).await?;
        file.write_all(format!("{line}\n").as_bytes()).await?;
        file.sync_all().await?;
        drop(file);

        if let Err(e) = tokio::fs::rename(&temp, &self.path).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(e);
        }
        Ok(())
    }

    /// Remove the marker. Returns whether one existed.
    pub async fn clear(&self) -> std::io::Result<bool> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }
}
