//! Versioned storage keys.
//!
//! Every publish writes the artifact under a fresh, never-overwritten key of
//! the form `{prefix}/{name}_{YYYYMMDD}_{HHMMSS}.{ext}`. When two publishes
//! land in the same UTC second the later one carries a sequence suffix,
//! `{name}_{YYYYMMDD}_{HHMMSS}_{n}.{ext}`, so history stays append-only.

use crate::hash::Fingerprint;
use std::cmp::Ordering;
use std::fmt;
use time::format_description::FormatItem;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime};

const STAMP_FORMAT: &[FormatItem<'static>] =
    format_description!("[year][month][day]_[hour][minute][second]");

/// Position of a versioned entry in publish history.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct VersionStamp {
    /// Publish time, truncated to the second, in UTC.
    pub published_at: OffsetDateTime,
    /// Disambiguates publishes within the same second (0 = first).
    pub sequence: u32,
}

impl VersionStamp {
    /// Stamp for a publish at `at`, truncated to second precision.
    pub fn at(at: OffsetDateTime) -> Self {
        let published_at = at
            .to_offset(time::UtcOffset::UTC)
            .replace_nanosecond(0)
            .unwrap_or(at);
        Self {
            published_at,
            sequence: 0,
        }
    }

    /// The same second with a different sequence number.
    pub fn with_sequence(self, sequence: u32) -> Self {
        Self { sequence, ..self }
    }

    fn render(&self) -> crate::Result<String> {
        let base = self
            .published_at
            .format(STAMP_FORMAT)
            .map_err(|e| crate::Error::InvalidTimestamp(e.to_string()))?;
        Ok(if self.sequence == 0 {
            base
        } else {
            format!("{base}_{}", self.sequence)
        })
    }

    fn parse(s: &str) -> Option<Self> {
        // "YYYYMMDD_HHMMSS" is 15 chars; anything after is "_{seq}".
        let (stamp, rest) = s.split_at_checked(15)?;
        let sequence = match rest {
            "" => 0,
            rest => {
                let digits = rest.strip_prefix('_')?;
                if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                    return None;
                }
                let seq: u32 = digits.parse().ok()?;
                if seq == 0 {
                    return None;
                }
                seq
            }
        };
        let published_at = PrimitiveDateTime::parse(stamp, STAMP_FORMAT)
            .ok()?
            .assume_utc();
        Some(Self {
            published_at,
            sequence,
        })
    }
}

impl Ord for VersionStamp {
    fn cmp(&self, other: &Self) -> Ordering {
        self.published_at
            .cmp(&other.published_at)
            .then(self.sequence.cmp(&other.sequence))
    }
}

impl PartialOrd for VersionStamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Naming scheme for versioned keys under one prefix.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VersionedKeyScheme {
    prefix: String,
    name: String,
    extension: String,
}

impl VersionedKeyScheme {
    /// Create a scheme. Leading/trailing slashes on the prefix and a leading
    /// dot on the extension are ignored.
    pub fn new(
        prefix: impl AsRef<str>,
        name: impl Into<String>,
        extension: impl AsRef<str>,
    ) -> crate::Result<Self> {
        let prefix = prefix.as_ref().trim_matches('/').to_string();
        let name = name.into();
        let extension = extension.as_ref().trim_start_matches('.').to_string();

        if name.is_empty() || name.contains('/') {
            return Err(crate::Error::InvalidVersionedKey(format!(
                "artifact name must be non-empty and contain no '/': {name:?}"
            )));
        }
        if extension.is_empty() || extension.contains('/') {
            return Err(crate::Error::InvalidVersionedKey(format!(
                "extension must be non-empty and contain no '/': {extension:?}"
            )));
        }

        Ok(Self {
            prefix,
            name,
            extension,
        })
    }

    /// The prefix (without trailing slash).
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// The listing prefix, including the trailing slash when non-empty.
    pub fn list_prefix(&self) -> String {
        if self.prefix.is_empty() {
            String::new()
        } else {
            format!("{}/", self.prefix)
        }
    }

    /// Key for the given stamp.
    pub fn key_for(&self, stamp: &VersionStamp) -> crate::Result<String> {
        Ok(format!(
            "{}{}_{}.{}",
            self.list_prefix(),
            self.name,
            stamp.render()?,
            self.extension
        ))
    }

    /// Parse a key produced by this scheme. Returns `None` for anything else,
    /// including the alias key.
    pub fn parse(&self, key: &str) -> Option<VersionStamp> {
        let rest = key.strip_prefix(&self.list_prefix())?;
        let rest = rest.strip_prefix(&self.name)?.strip_prefix('_')?;
        let rest = rest.strip_suffix(&self.extension)?.strip_suffix('.')?;
        VersionStamp::parse(rest)
    }
}

/// A published, immutable version of the artifact.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VersionedEntry {
    /// Storage key.
    pub key: String,
    /// Position in publish history, parsed from the key.
    pub stamp: VersionStamp,
    /// Object size in bytes.
    pub size: u64,
    /// Fingerprint recorded in the object's metadata. `None` when the object
    /// carries no (or malformed) fingerprint metadata.
    pub fingerprint: Option<Fingerprint>,
    /// Publisher identity recorded in metadata.
    pub uploaded_by: Option<String>,
    /// Backend version identifier, for stores with per-key history.
    pub version_id: Option<String>,
}

impl fmt::Display for VersionedEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fingerprint = self
            .fingerprint
            .map(|fp| fp.to_hex())
            .unwrap_or_else(|| "-".to_string());
        write!(f, "{} {} bytes sha256={}", self.key, self.size, fingerprint)
    }
}
