//! Self-describing metadata stored alongside every artifact write.

use crate::hash::{Fingerprint, SecondaryDigest};
use std::collections::BTreeMap;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Metadata key for the SHA-256 fingerprint.
pub const KEY_SHA256: &str = "sha256";
/// Metadata key for the MD5 digest.
pub const KEY_MD5: &str = "md5";
/// Metadata key for the publisher identity.
pub const KEY_UPLOADED_BY: &str = "uploaded-by";
/// Metadata key for the publish timestamp.
pub const KEY_UPLOAD_TIMESTAMP: &str = "upload-timestamp";
/// Metadata key for the content type.
pub const KEY_CONTENT_TYPE: &str = "content-type";

/// Default content type for SQL artifacts.
pub const SQL_CONTENT_TYPE: &str = "application/sql";

const RESERVED: [&str; 5] = [
    KEY_SHA256,
    KEY_MD5,
    KEY_UPLOADED_BY,
    KEY_UPLOAD_TIMESTAMP,
    KEY_CONTENT_TYPE,
];

/// Tags written with the artifact bytes.
///
/// A consumer holding only the alias's metadata can re-derive the expected
/// fingerprint from these tags.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArtifactMetadata {
    pub fingerprint: Fingerprint,
    pub secondary: Option<SecondaryDigest>,
    pub uploaded_by: String,
    pub uploaded_at: OffsetDateTime,
    pub content_type: String,
    /// Operator-supplied extra tags (e.g. `app`, `db-name`).
    pub extra: BTreeMap<String, String>,
}

impl ArtifactMetadata {
    /// Encode as a flat string map suitable for object user metadata.
    pub fn to_map(&self) -> crate::Result<BTreeMap<String, String>> {
        let mut map = BTreeMap::new();
        for (key, value) in &self.extra {
            let key = key.to_ascii_lowercase();
            if RESERVED.contains(&key.as_str()) {
                return Err(crate::Error::InvalidMetadata(format!(
                    "extra metadata key {key:?} is reserved"
                )));
            }
            map.insert(key, value.clone());
        }
        map.insert(KEY_SHA256.to_string(), self.fingerprint.to_hex());
        if let Some(md5) = &self.secondary {
            map.insert(KEY_MD5.to_string(), md5.to_hex());
        }
        map.insert(KEY_UPLOADED_BY.to_string(), self.uploaded_by.clone());
        map.insert(
            KEY_UPLOAD_TIMESTAMP.to_string(),
            self.uploaded_at
                .format(&Rfc3339)
                .map_err(|e| crate::Error::InvalidTimestamp(e.to_string()))?,
        );
        map.insert(KEY_CONTENT_TYPE.to_string(), self.content_type.clone());
        Ok(map)
    }

    /// Decode from object user metadata. Keys are matched case-insensitively
    /// since some stores normalize header case.
    pub fn from_map(map: &BTreeMap<String, String>) -> crate::Result<Self> {
        let lowered: BTreeMap<String, &String> = map
            .iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v))
            .collect();
        let get = |key: &str| lowered.get(key).map(|v| v.as_str());

        let fingerprint = get(KEY_SHA256)
            .ok_or_else(|| crate::Error::InvalidMetadata(format!("missing {KEY_SHA256}")))
            .and_then(Fingerprint::from_hex)?;
        let secondary = get(KEY_MD5).map(SecondaryDigest::from_hex).transpose()?;
        let uploaded_by = get(KEY_UPLOADED_BY).unwrap_or_default().to_string();
        let uploaded_at = match get(KEY_UPLOAD_TIMESTAMP) {
            Some(ts) => OffsetDateTime::parse(ts, &Rfc3339)
                .map_err(|e| crate::Error::InvalidTimestamp(format!("{ts}: {e}")))?,
            None => {
                return Err(crate::Error::InvalidMetadata(format!(
                    "missing {KEY_UPLOAD_TIMESTAMP}"
                )));
            }
        };
        let content_type = get(KEY_CONTENT_TYPE)
            .unwrap_or(SQL_CONTENT_TYPE)
            .to_string();
        let extra = lowered
            .into_iter()
            .filter(|(k, _)| !RESERVED.contains(&k.as_str()))
            .map(|(k, v)| (k, v.clone()))
            .collect();

        Ok(Self {
            fingerprint,
            secondary,
            uploaded_by,
            uploaded_at,
            content_type,
            extra,
        })
    }

    /// Read only the fingerprint tag, tolerating otherwise incomplete metadata.
    pub fn fingerprint_from_map(map: &BTreeMap<String, String>) -> Option<Fingerprint> {
        map.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(KEY_SHA256))
            .and_then(|(_, v)| Fingerprint::from_hex(v).ok())
    }

    /// Read only the publisher identity tag.
    pub fn uploaded_by_from_map(map: &BTreeMap<String, String>) -> Option<String> {
        map.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(KEY_UPLOADED_BY))
            .map(|(_, v)| v.clone())
    }
}
