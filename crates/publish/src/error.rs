//! Publisher error types.

use ferry_storage::StorageError;
use thiserror::Error;

/// Errors raised while publishing or inspecting published artifacts.
#[derive(Debug, Error)]
pub enum PublishError {
    /// Any failure of the object store. Nothing after the failing step runs.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("could not resolve publisher identity: {0}")]
    Identity(String),

    #[error(transparent)]
    Core(#[from] ferry_core::Error),

    #[error("invalid publish configuration: {0}")]
    Config(String),

    #[error("no free versioned key for {key} after {attempts} attempts")]
    KeyExhausted { key: String, attempts: u32 },
}

/// Result type for publisher operations.
pub type PublishResult<T> = std::result::Result<T, PublishError>;
