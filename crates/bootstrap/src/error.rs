//! Bootstrap error types.

use ferry_core::Fingerprint;
use ferry_storage::StorageError;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// States of a bootstrap run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum State {
    Start,
    WaitDependency,
    Fetch,
    Verify,
    Apply,
    Done,
    Failed,
}

impl State {
    /// Stable upper-case name used in log lines and rendered scripts.
    pub fn as_str(&self) -> &'static str {
        match self {
            State::Start => "START",
            State::WaitDependency => "WAIT_DEPENDENCY",
            State::Fetch => "FETCH",
            State::Verify => "VERIFY",
            State::Apply => "APPLY",
            State::Done => "DONE",
            State::Failed => "FAILED",
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a run ended in `Failed`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FailureReason {
    DependencyUnavailable,
    FetchExhausted,
    IntegrityMismatch,
    ApplyError,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::DependencyUnavailable => "DependencyUnavailable",
            FailureReason::FetchExhausted => "FetchExhausted",
            FailureReason::IntegrityMismatch => "IntegrityMismatch",
            FailureReason::ApplyError => "ApplyError",
        }
    }

    /// Process exit code reported for this reason.
    pub fn exit_code(&self) -> u8 {
        match self {
            FailureReason::DependencyUnavailable => 10,
            FailureReason::FetchExhausted => 11,
            FailureReason::IntegrityMismatch => 12,
            FailureReason::ApplyError => 13,
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Underlying cause of a failed state.
#[derive(Debug, Error)]
pub enum FailureCause {
    #[error("dependency not ready after {attempts} checks")]
    NotReady { attempts: u32 },

    #[error("fetch failed: {0}")]
    Storage(#[from] StorageError),

    #[error("failed to stage artifact: {0}")]
    Staging(#[source] std::io::Error),

    #[error("fingerprint mismatch: expected {expected}, got {actual}")]
    Mismatch {
        expected: Fingerprint,
        actual: Fingerprint,
    },

    #[error(transparent)]
    Apply(#[from] ApplyError),
}

/// Errors returned by [`crate::Bootstrapper::run`].
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// Terminal failure of the state machine.
    #[error("bootstrap failed in state {state} ({reason}): {source}")]
    Failed {
        state: State,
        reason: FailureReason,
        #[source]
        source: FailureCause,
    },

    #[error("invalid descriptor: {0}")]
    Descriptor(#[from] ferry_core::Error),

    #[error("host state error at {}: {source}", path.display())]
    Host {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("storage setup failed: {0}")]
    Storage(#[from] StorageError),

    #[error("sink setup failed: {0}")]
    Sink(#[source] ApplyError),
}

impl BootstrapError {
    pub(crate) fn host(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Host {
            path: path.into(),
            source,
        }
    }

    /// Failure reason when the state machine itself failed.
    pub fn reason(&self) -> Option<FailureReason> {
        match self {
            BootstrapError::Failed { reason, .. } => Some(*reason),
            _ => None,
        }
    }

    /// Process exit code: reason-specific for state failures, 1 otherwise.
    pub fn exit_code(&self) -> u8 {
        self.reason().map_or(1, |reason| reason.exit_code())
    }
}

/// Result type for bootstrap operations.
pub type BootstrapResult<T> = std::result::Result<T, BootstrapError>;

/// Errors from applying an artifact to its sink.
#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("artifact is not valid UTF-8 SQL")]
    Encoding,

    #[error("{program} exited with {status}: {stderr}")]
    CommandFailed {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("sink configuration error: {0}")]
    Config(String),
}

/// Errors from rendering a bootstrap script.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("invalid descriptor: {0}")]
    Descriptor(#[from] ferry_core::Error),

    #[error("path is not valid UTF-8: {}", .0.display())]
    NonUtf8Path(PathBuf),
}
