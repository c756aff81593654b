use super::mocks::{RecordingSink, ScriptedProbe, ScriptedStore};
use ferry_bootstrap::Bootstrapper;
use ferry_core::config::PublishConfig;
use ferry_core::{
    Artifact, BootstrapDescriptor, DatabaseTarget, Fingerprint, HostPaths, ProbeKind,
    ReadinessPolicy, RetryPolicy, SinkConfig, StorageConfig,
};
use ferry_publish::{Publisher, StaticIdentity};
use ferry_storage::MemoryBackend;
use std::path::Path;
use std::sync::Arc;

pub const SQL: &[u8] = b"CREATE TABLE t();";
pub const ALIAS_KEY: &str = "init_db/latest.sql";

/// A memory store holding `SQL` published under the default alias.
pub async fn published_store() -> (Arc<MemoryBackend>, Fingerprint) {
    let store = Arc::new(MemoryBackend::new());
    let publisher = Publisher::new(
        store.clone(),
        Arc::new(StaticIdentity::new("ci@build")),
        &PublishConfig::default(),
    )
    .unwrap();
    let entry = publisher.publish(&Artifact::new(SQL)).await.unwrap();
    (store, entry.fingerprint.unwrap())
}

/// Descriptor without a database, with host files under `root`.
pub fn descriptor(root: &Path, expected: Fingerprint) -> BootstrapDescriptor {
    BootstrapDescriptor {
        alias_key: ALIAS_KEY.to_string(),
        expected_fingerprint: expected,
        source: StorageConfig::Filesystem {
            path: root.join("store"),
        },
        database: None,
        probe: ProbeKind::Tcp,
        sink: SinkConfig::Command {
            program: "psql".to_string(),
            args: vec!["-f".to_string(), "{artifact}".to_string()],
        },
        retry: RetryPolicy::default(),
        readiness: ReadinessPolicy::default(),
        paths: HostPaths::under(root.join("host")),
    }
}

#[allow(dead_code)]
pub fn with_database(mut descriptor: BootstrapDescriptor) -> BootstrapDescriptor {
    descriptor.database = Some(DatabaseTarget::new("db.internal", "app", "app"));
    descriptor
}

pub fn bootstrapper(
    descriptor: BootstrapDescriptor,
    store: Arc<ScriptedStore>,
    probe: Arc<ScriptedProbe>,
    sink: Arc<RecordingSink>,
) -> Bootstrapper {
    Bootstrapper::new(descriptor, store, probe, sink).unwrap()
}
