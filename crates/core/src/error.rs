//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid hash: {0}")]
    InvalidHash(String),

    #[error("invalid versioned key: {0}")]
    InvalidVersionedKey(String),

    #[error("invalid metadata: {0}")]
    InvalidMetadata(String),

    #[error("invalid descriptor: {0}")]
    InvalidDescriptor(String),

    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
