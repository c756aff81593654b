//! External-program sink, e.g. `psql`.

use super::{ApplyReport, ApplySink};
use crate::error::ApplyError;
use async_trait::async_trait;
use ferry_core::{ARTIFACT_PLACEHOLDER, Artifact, DatabaseTarget};
use std::path::Path;
use tokio::process::Command;
use tracing::{info, instrument};

/// Bytes of stderr kept in a failure report.
const STDERR_TAIL: usize = 2048;

/// Runs a program with the staged file path substituted for `{artifact}`.
///
/// When a database target is known, the libpq variables (`PGHOST`,
/// `PGPORT`, `PGDATABASE`, `PGUSER`, `PGSSLMODE`, and `PGPASSWORD` from the
/// configured variable) are exported to the child.
#[derive(Clone, Debug)]
pub struct CommandSink {
    program: String,
    args: Vec<String>,
    database: Option<DatabaseTarget>,
}

impl CommandSink {
    pub fn new(program: String, args: Vec<String>, database: Option<DatabaseTarget>) -> Self {
        Self {
            program,
            args,
            database,
        }
    }

    /// Arguments with the placeholder replaced.
    pub fn resolved_args(&self, staged: &Path) -> Vec<String> {
        let staged = staged.to_string_lossy();
        self.args
            .iter()
            .map(|arg| arg.replace(ARTIFACT_PLACEHOLDER, &staged))
            .collect()
    }

    fn command(&self, staged: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(self.resolved_args(staged)).kill_on_drop(true);
        if let Some(db) = &self.database {
            cmd.env("PGHOST", &db.host)
                .env("PGPORT", db.port.to_string())
                .env("PGDATABASE", &db.database)
                .env("PGUSER", &db.username)
                .env("PGSSLMODE", db.ssl_mode.as_str());
            if let Some(password) = db.password() {
                cmd.env("PGPASSWORD", password);
            }
        }
        cmd
    }
}

#[async_trait]
impl ApplySink for CommandSink {
    #[instrument(skip_all, fields(program = %self.program))]
    async fn apply(&self, _artifact: &Artifact, staged: &Path) -> Result<ApplyReport, ApplyError> {
        let output = self.command(staged).output().await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let start = stderr.len().saturating_sub(STDERR_TAIL);
            let start = (start..stderr.len())
                .find(|i| stderr.is_char_boundary(*i))
                .unwrap_or(stderr.len());
            return Err(ApplyError::CommandFailed {
                program: self.program.clone(),
                status: output.status.to_string(),
                stderr: stderr[start..].trim().to_string(),
            });
        }
        info!("command completed");
        Ok(ApplyReport::Command {
            program: self.program.clone(),
        })
    }

    fn sink_name(&self) -> &'static str {
        "command"
    }
}
