//! Core domain types and shared logic for Ferry.
//!
//! This crate defines the data model used across all other crates:
//! - Artifact fingerprints (SHA-256) and secondary digests (MD5)
//! - Versioned storage keys and publish history entries
//! - Artifact metadata tags
//! - Retry and readiness policies
//! - Bootstrap descriptors and application configuration

pub mod artifact;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod hash;
pub mod metadata;
pub mod retry;
pub mod version;

pub use artifact::Artifact;
pub use config::{AppConfig, BootstrapConfig, IdentityConfig, PublishConfig, StorageConfig};
pub use descriptor::{
    ARTIFACT_PLACEHOLDER, BootstrapDescriptor, DatabaseTarget, HostPaths, PgSslMode, ProbeKind,
    SinkConfig,
};
pub use error::{Error, Result};
pub use hash::{Fingerprint, SecondaryDigest};
pub use metadata::ArtifactMetadata;
pub use retry::{Backoff, ReadinessPolicy, RetryPolicy};
pub use version::{VersionStamp, VersionedEntry, VersionedKeyScheme};
