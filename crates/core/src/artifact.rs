//! The artifact being distributed.

use crate::hash::{Fingerprint, SecondaryDigest};
use bytes::Bytes;
use std::path::Path;

/// Immutable artifact bytes together with their digests.
///
/// Digests are computed once at construction, so a value of this type always
/// describes exactly the bytes it holds.
#[derive(Clone, Debug)]
pub struct Artifact {
    bytes: Bytes,
    fingerprint: Fingerprint,
    secondary: SecondaryDigest,
}

impl Artifact {
    /// Wrap bytes and compute their digests.
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        let bytes = bytes.into();
        let fingerprint = Fingerprint::compute(&bytes);
        let secondary = SecondaryDigest::compute(&bytes);
        Self {
            bytes,
            fingerprint,
            secondary,
        }
    }

    /// Read an artifact from a local file.
    pub fn read(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let data = std::fs::read(path)?;
        Ok(Self::new(data))
    }

    /// The raw bytes.
    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    /// Size in bytes.
    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    /// SHA-256 fingerprint.
    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    /// MD5 digest.
    pub fn secondary_digest(&self) -> SecondaryDigest {
        self.secondary
    }

    /// Check the artifact against an expected fingerprint.
    pub fn verify(&self, expected: &Fingerprint) -> crate::Result<()> {
        if &self.fingerprint == expected {
            Ok(())
        } else {
            Err(crate::Error::InvalidHash(format!(
                "fingerprint mismatch: expected {expected}, got {}",
                self.fingerprint
            )))
        }
    }
}
