//! Host bootstrap for Ferry artifacts.
//!
//! This crate provides:
//! - The `Bootstrapper` state machine: wait for the database, fetch the
//!   alias, verify its fingerprint, apply it once, mark completion
//! - Readiness probes (TCP, Postgres) and apply sinks (Postgres with a
//!   ledger, external command)
//! - A renderer producing an equivalent standalone bash script

pub mod error;
pub mod machine;
pub mod marker;
mod pg;
pub mod probe;
pub mod render;
pub mod sink;
mod templates;

pub use error::{
    ApplyError, BootstrapError, BootstrapResult, FailureCause, FailureReason, RenderError, State,
};
pub use machine::{BootstrapOutcome, Bootstrapper};
pub use marker::{CompletionMarker, MarkerState};
pub use probe::{PostgresProbe, ReadinessProbe, TcpProbe};
pub use render::{render_bootstrap, render_user_data};
pub use sink::{ApplyReport, ApplySink, CommandSink, PostgresSink};
