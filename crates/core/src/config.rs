//! Configuration types shared across crates.

use crate::descriptor::{DatabaseTarget, HostPaths, ProbeKind, SinkConfig};
use crate::metadata::SQL_CONTENT_TYPE;
use crate::retry::{ReadinessPolicy, RetryPolicy};
use crate::version::VersionedKeyScheme;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Storage backend configuration.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Local filesystem storage.
    Filesystem {
        /// Root directory for storage.
        path: PathBuf,
    },
    /// S3-compatible storage.
    S3 {
        /// Bucket name.
        bucket: String,
        /// Optional endpoint URL (for MinIO, etc.).
        #[serde(default, skip_serializing_if = "Option::is_none")]
        endpoint: Option<String>,
        /// AWS region.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        region: Option<String>,
        /// Optional key prefix.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        prefix: Option<String>,
        /// AWS access key ID. Falls back to the default credential chain if not set.
        /// WARNING: Prefer env vars or IAM roles over storing secrets in config files.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        access_key_id: Option<String>,
        /// AWS secret access key. Falls back to the default credential chain if not set.
        /// WARNING: Prefer env vars or IAM roles over storing secrets in config files.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        secret_access_key: Option<String>,
        /// Force path-style URLs (e.g., `endpoint/bucket/key` instead of `bucket.endpoint/key`).
        /// Required for MinIO and some S3-compatible services.
        #[serde(default)]
        force_path_style: bool,
        /// Request AES256 server-side encryption on every write.
        #[serde(default)]
        server_side_encryption: bool,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Filesystem {
            path: PathBuf::from("./data/artifacts"),
        }
    }
}

impl StorageConfig {
    /// Validate storage configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            StorageConfig::S3 {
                bucket,
                access_key_id,
                secret_access_key,
                ..
            } => {
                if bucket.trim().is_empty() {
                    return Err("s3 config requires a bucket".to_string());
                }
                match (access_key_id.as_ref(), secret_access_key.as_ref()) {
                    (Some(_), Some(_)) | (None, None) => Ok(()),
                    _ => Err(
                        "s3 config requires both access_key_id and secret_access_key when either is set"
                            .to_string(),
                    ),
                }
            }
            StorageConfig::Filesystem { path } => {
                if path.as_os_str().is_empty() {
                    return Err("filesystem config requires a path".to_string());
                }
                Ok(())
            }
        }
    }

    /// Whether static credentials are present.
    pub fn has_credentials(&self) -> bool {
        matches!(
            self,
            StorageConfig::S3 {
                access_key_id: Some(_),
                ..
            } | StorageConfig::S3 {
                secret_access_key: Some(_),
                ..
            }
        )
    }

    /// The same location with static credentials removed.
    pub fn without_credentials(&self) -> Self {
        match self {
            StorageConfig::S3 {
                bucket,
                endpoint,
                region,
                prefix,
                force_path_style,
                server_side_encryption,
                ..
            } => StorageConfig::S3 {
                bucket: bucket.clone(),
                endpoint: endpoint.clone(),
                region: region.clone(),
                prefix: prefix.clone(),
                access_key_id: None,
                secret_access_key: None,
                force_path_style: *force_path_style,
                server_side_encryption: *server_side_encryption,
            },
            other => other.clone(),
        }
    }
}

/// Source of the publisher identity recorded in metadata.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum IdentityConfig {
    /// Caller ARN from AWS STS `GetCallerIdentity`.
    Sts,
    /// A fixed principal string.
    Static { principal: String },
    /// `user@hostname` of the local process.
    #[default]
    Local,
}

/// Publisher configuration.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PublishConfig {
    /// Key prefix for versioned entries (default: `init_db`).
    #[serde(default = "default_prefix")]
    pub prefix: String,
    /// Artifact base name (default: `init_db`).
    #[serde(default = "default_name")]
    pub name: String,
    /// File extension without the dot (default: `sql`).
    #[serde(default = "default_extension")]
    pub extension: String,
    /// Mutable alias key (default: `init_db/latest.sql`).
    #[serde(default = "default_alias_key")]
    pub alias_key: String,
    #[serde(default = "default_content_type")]
    pub content_type: String,
    #[serde(default)]
    pub identity: IdentityConfig,
    /// Extra tags written with every artifact (e.g. `app`, `db-name`).
    #[serde(default)]
    pub extra_metadata: BTreeMap<String, String>,
    /// Versioned entries older than this many days may be pruned.
    /// Unset disables pruning.
    #[serde(default)]
    pub retention_days: Option<u32>,
}

fn default_prefix() -> String {
    "init_db".to_string()
}

fn default_name() -> String {
    "init_db".to_string()
}

fn default_extension() -> String {
    "sql".to_string()
}

fn default_alias_key() -> String {
    "init_db/latest.sql".to_string()
}

fn default_content_type() -> String {
    SQL_CONTENT_TYPE.to_string()
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            name: default_name(),
            extension: default_extension(),
            alias_key: default_alias_key(),
            content_type: default_content_type(),
            identity: IdentityConfig::default(),
            extra_metadata: BTreeMap::new(),
            retention_days: None,
        }
    }
}

impl PublishConfig {
    /// The versioned key scheme described by this configuration.
    pub fn key_scheme(&self) -> crate::Result<VersionedKeyScheme> {
        VersionedKeyScheme::new(&self.prefix, self.name.clone(), &self.extension)
    }

    /// Validate publisher configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        if self.prefix.trim_matches('/').is_empty() {
            return Err("publish.prefix must not be empty".to_string());
        }
        let scheme = self.key_scheme().map_err(|e| e.to_string())?;
        if self.alias_key.trim().is_empty() {
            return Err("publish.alias_key must not be empty".to_string());
        }
        if scheme.parse(&self.alias_key).is_some() {
            return Err(format!(
                "publish.alias_key {:?} collides with the versioned key pattern",
                self.alias_key
            ));
        }
        if self.content_type.trim().is_empty() {
            return Err("publish.content_type must not be empty".to_string());
        }
        if let IdentityConfig::Static { principal } = &self.identity
            && principal.trim().is_empty()
        {
            return Err("publish.identity.principal must not be empty".to_string());
        }
        if self.retention_days == Some(0) {
            return Err("publish.retention_days must be at least 1 when set".to_string());
        }
        Ok(())
    }
}

/// Defaults from which bootstrap descriptors are built.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BootstrapConfig {
    #[serde(default)]
    pub database: Option<DatabaseTarget>,
    #[serde(default)]
    pub probe: ProbeKind,
    #[serde(default)]
    pub sink: SinkConfig,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub readiness: ReadinessPolicy,
    #[serde(default)]
    pub paths: HostPaths,
}

impl BootstrapConfig {
    /// Validate bootstrap defaults. The database/sink pairing is only checked
    /// when a descriptor is generated.
    pub fn validate(&self) -> Result<(), String> {
        if let Some(database) = &self.database {
            database.validate()?;
        }
        self.retry.validate()?;
        self.readiness.validate()?;
        Ok(())
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Storage backend configuration.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Publisher configuration.
    #[serde(default)]
    pub publish: PublishConfig,
    /// Bootstrap defaults.
    #[serde(default)]
    pub bootstrap: BootstrapConfig,
}

impl AppConfig {
    /// Validate every section.
    pub fn validate(&self) -> Result<(), String> {
        self.storage.validate()?;
        self.publish.validate()?;
        self.bootstrap.validate()?;
        Ok(())
    }
}
