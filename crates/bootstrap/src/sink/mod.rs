//! Apply sinks: where a verified artifact is executed.

pub mod command;
pub mod postgres;

pub use command::CommandSink;
pub use postgres::PostgresSink;

use crate::error::ApplyError;
use async_trait::async_trait;
use ferry_core::{Artifact, BootstrapDescriptor, SinkConfig};
use std::path::Path;
use std::sync::Arc;
use time::OffsetDateTime;

/// What an apply did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ApplyReport {
    /// Executed and recorded in the ledger.
    Applied {
        /// User tables present after the apply.
        table_count: Option<i64>,
    },
    /// The ledger already held this fingerprint; nothing was executed.
    AlreadyApplied {
        applied_at: OffsetDateTime,
        applied_by: String,
    },
    /// An external program ran to completion.
    Command { program: String },
}

/// Executes a verified artifact exactly once per call.
///
/// `staged` is the on-disk copy of `artifact`, for sinks that hand a file to
/// another program.
#[async_trait]
pub trait ApplySink: Send + Sync {
    async fn apply(&self, artifact: &Artifact, staged: &Path) -> Result<ApplyReport, ApplyError>;

    /// Name for logs.
    fn sink_name(&self) -> &'static str;
}

/// Build the sink named by a descriptor. `applied_by` is recorded in the
/// ledger of sinks that keep one.
pub fn from_descriptor(
    descriptor: &BootstrapDescriptor,
    applied_by: impl Into<String>,
) -> Result<Arc<dyn ApplySink>, ApplyError> {
    match &descriptor.sink {
        SinkConfig::Postgres => {
            let target = descriptor.database.clone().ok_or_else(|| {
                ApplyError::Config("postgres sink requires a database target".to_string())
            })?;
            Ok(Arc::new(PostgresSink::new(target, applied_by)))
        }
        SinkConfig::Command { program, args } => Ok(Arc::new(CommandSink::new(
            program.clone(),
            args.clone(),
            descriptor.database.clone(),
        ))),
    }
}

/// Hostname of this machine, the default `applied_by` value.
pub fn local_host() -> String {
    gethostname::gethostname().to_string_lossy().into_owned()
}
