//! The bootstrap state machine.
//!
//! `Start → WaitDependency → Fetch → Verify → Apply → Done`, with `Failed`
//! reachable from every state after `Start`. Each state returns a `Result`;
//! the first `Err` ends the run.

use crate::error::{BootstrapError, BootstrapResult, FailureCause, FailureReason, State};
use crate::marker::CompletionMarker;
use crate::probe::{self, ReadinessProbe};
use crate::sink::{self, ApplyReport, ApplySink};
use ferry_core::{Artifact, BootstrapDescriptor, DatabaseTarget, Fingerprint};
use ferry_storage::ObjectStore;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::io::AsyncWriteExt;
use tracing::{error, info, warn};

/// How a successful run ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BootstrapOutcome {
    /// The marker was already present; nothing ran.
    AlreadyComplete { marked_at: Option<OffsetDateTime> },
    /// The artifact was fetched, verified and applied.
    Applied {
        fingerprint: Fingerprint,
        marked_at: OffsetDateTime,
        ledger: ApplyReport,
    },
}

/// Runs one descriptor against a host.
pub struct Bootstrapper {
    descriptor: BootstrapDescriptor,
    store: Arc<dyn ObjectStore>,
    probe: Arc<dyn ReadinessProbe>,
    sink: Arc<dyn ApplySink>,
    marker: CompletionMarker,
}

impl std::fmt::Debug for Bootstrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bootstrapper")
            .field("alias_key", &self.descriptor.alias_key)
            .field("backend", &self.store.backend_name())
            .field("sink", &self.sink.sink_name())
            .field("marker", &self.marker.path())
            .finish_non_exhaustive()
    }
}

impl Bootstrapper {
    /// Assemble a bootstrapper from explicit collaborators.
    pub fn new(
        descriptor: BootstrapDescriptor,
        store: Arc<dyn ObjectStore>,
        probe: Arc<dyn ReadinessProbe>,
        sink: Arc<dyn ApplySink>,
    ) -> BootstrapResult<Self> {
        descriptor.validate()?;
        let marker = CompletionMarker::new(&descriptor.paths.marker);
        Ok(Self {
            descriptor,
            store,
            probe,
            sink,
            marker,
        })
    }

    /// Build the store, probe and sink the descriptor names.
    pub async fn from_descriptor(descriptor: BootstrapDescriptor) -> BootstrapResult<Self> {
        descriptor.validate()?;
        let store = ferry_storage::from_config(&descriptor.source).await?;
        let probe = probe::from_kind(descriptor.probe, descriptor.readiness.connect_timeout());
        let sink =
            sink::from_descriptor(&descriptor, sink::local_host()).map_err(BootstrapError::Sink)?;
        Self::new(descriptor, store, probe, sink)
    }

    pub fn descriptor(&self) -> &BootstrapDescriptor {
        &self.descriptor
    }

    pub fn marker(&self) -> &CompletionMarker {
        &self.marker
    }

    /// Drive the state machine to `Done` or `Failed`.
    pub async fn run(&self) -> BootstrapResult<BootstrapOutcome> {
        let alias_key = self.descriptor.alias_key.as_str();
        info!(state = %State::Start, alias_key, marker = %self.marker.path().display(), "bootstrap starting");

        if let Some(existing) = self
            .marker
            .read()
            .await
            .map_err(|e| BootstrapError::host(self.marker.path(), e))?
        {
            info!(
                state = %State::Done,
                alias_key,
                marked_at = ?existing.marked_at,
                "completion marker present, nothing to do (ferryctl bootstrap reset clears it)"
            );
            return Ok(BootstrapOutcome::AlreadyComplete {
                marked_at: existing.marked_at,
            });
        }

        if let Some(database) = &self.descriptor.database {
            self.wait_dependency(database).await?;
        }

        let artifact = self.fetch_verified().await?;
        let ledger = self.apply(&artifact).await?;

        let marked_at = OffsetDateTime::now_utc();
        self.marker
            .write(marked_at)
            .await
            .map_err(|e| BootstrapError::host(self.marker.path(), e))?;
        remove_staged(&self.descriptor.paths.staging).await;

        info!(
            state = %State::Done,
            alias_key,
            fingerprint = %artifact.fingerprint(),
            "bootstrap complete"
        );
        Ok(BootstrapOutcome::Applied {
            fingerprint: artifact.fingerprint(),
            marked_at,
            ledger,
        })
    }

    async fn wait_dependency(&self, database: &DatabaseTarget) -> BootstrapResult<()> {
        let policy = &self.descriptor.readiness;
        for attempt in 1..=policy.max_attempts {
            if self.probe.is_ready(database).await {
                info!(
                    state = %State::WaitDependency,
                    host = %database.host,
                    port = database.port,
                    attempt,
                    "dependency ready"
                );
                return Ok(());
            }
            info!(
                state = %State::WaitDependency,
                host = %database.host,
                attempt,
                max_attempts = policy.max_attempts,
                "dependency not ready"
            );
            if attempt < policy.max_attempts {
                tokio::time::sleep(policy.interval()).await;
            }
        }
        Err(self.fail(
            State::WaitDependency,
            FailureReason::DependencyUnavailable,
            FailureCause::NotReady {
                attempts: policy.max_attempts,
            },
        ))
    }

    /// Fetch and verify, retrying both under the retry policy.
    async fn fetch_verified(&self) -> BootstrapResult<Artifact> {
        let retry = &self.descriptor.retry;
        let expected = self.descriptor.expected_fingerprint;
        let mut last = None;

        for attempt in 1..=retry.max_attempts {
            info!(
                state = %State::Fetch,
                alias_key = %self.descriptor.alias_key,
                attempt,
                max_attempts = retry.max_attempts,
                "fetching artifact"
            );

            match self.fetch_once().await {
                Ok(artifact) => {
                    let actual = artifact.fingerprint();
                    if actual == expected {
                        info!(state = %State::Verify, fingerprint = %actual, "fingerprint verified");
                        return Ok(artifact);
                    }
                    warn!(
                        state = %State::Verify,
                        attempt,
                        expected = %expected,
                        actual = %actual,
                        "fingerprint mismatch, discarding staged file"
                    );
                    remove_staged(&self.descriptor.paths.staging).await;
                    last = Some((
                        State::Verify,
                        FailureReason::IntegrityMismatch,
                        FailureCause::Mismatch { expected, actual },
                    ));
                }
                Err(cause) => {
                    warn!(state = %State::Fetch, attempt, error = %cause, "fetch attempt failed");
                    last = Some((State::Fetch, FailureReason::FetchExhausted, cause));
                }
            }

            if attempt < retry.max_attempts {
                let delay = retry.delay_for(attempt);
                info!(state = %State::Fetch, attempt, delay_secs = delay.as_secs(), "retrying after delay");
                tokio::time::sleep(delay).await;
            }
        }

        let (state, reason, cause) = last.unwrap_or((
            State::Fetch,
            FailureReason::FetchExhausted,
            FailureCause::Staging(std::io::Error::other("no fetch attempts were made")),
        ));
        Err(self.fail(state, reason, cause))
    }

    async fn fetch_once(&self) -> Result<Artifact, FailureCause> {
        let bytes = self.store.get(&self.descriptor.alias_key).await?;
        write_staged(&self.descriptor.paths.staging, &bytes)
            .await
            .map_err(FailureCause::Staging)?;
        Ok(Artifact::new(bytes))
    }

    async fn apply(&self, artifact: &Artifact) -> BootstrapResult<ApplyReport> {
        let staging = &self.descriptor.paths.staging;
        info!(state = %State::Apply, sink = self.sink.sink_name(), staged = %staging.display(), "applying artifact");
        match self.sink.apply(artifact, staging).await {
            Ok(report) => Ok(report),
            // The staged file is kept for diagnosis.
            Err(e) => Err(self.fail(State::Apply, FailureReason::ApplyError, e.into())),
        }
    }

    fn fail(&self, state: State, reason: FailureReason, cause: FailureCause) -> BootstrapError {
        error!(
            state = %state,
            reason = %reason,
            alias_key = %self.descriptor.alias_key,
            error = %cause,
            "bootstrap failed"
        );
        BootstrapError::Failed {
            state,
            reason,
            source: cause,
        }
    }
}

/// Write fetched bytes to the staging path, readable only by the owner.
async fn write_staged(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(0o600);

    let mut file = options.open(path).await?;
    #[cfg(unix)]
    {
        // `mode` only applies on creation; tighten a pre-existing file too.
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(std::fs::Permissions::from_mode(0o600))
            .await?;
    }
    file.write_all(bytes).await?;
    file.sync_all().await
}

async fn remove_staged(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "failed to remove staged file"),
    }
}
