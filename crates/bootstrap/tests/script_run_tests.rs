// Runs rendered scripts under bash against a filesystem source and a shell
// command sink, checking the same outcomes the native runner guarantees.
#![cfg(unix)]

mod common;

use common::{SQL, descriptor};
use ferry_bootstrap::render_bootstrap;
use ferry_core::{Backoff, BootstrapDescriptor, Fingerprint, RetryPolicy, SinkConfig};
use std::fs;
use std::path::PathBuf;
use std::process::{Command, Output};
use tempfile::TempDir;

struct Host {
    dir: TempDir,
}

impl Host {
    /// Source object published under the default alias, nothing applied yet.
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let alias = dir.path().join("store/init_db/latest.sql");
        fs::create_dir_all(alias.parent().unwrap()).unwrap();
        fs::write(&alias, SQL).unwrap();
        Self { dir }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Descriptor whose sink appends the staged file to `applied.sql`, with
    /// two fetch attempts and no delay between them.
    fn descriptor(&self, expected: Fingerprint) -> BootstrapDescriptor {
        let mut desc = descriptor(self.dir.path(), expected);
        desc.sink = SinkConfig::Command {
            program: "sh".to_string(),
            args: vec![
                "-c".to_string(),
                "cat \"$1\" >> \"$2\"".to_string(),
                "sh".to_string(),
                "{artifact}".to_string(),
                self.path("applied.sql").display().to_string(),
            ],
        };
        desc.retry = RetryPolicy {
            max_attempts: 2,
            initial_delay_secs: 0,
            backoff: Backoff::Linear { increment_secs: 0 },
            max_delay_secs: None,
        };
        desc
    }

    fn run(&self, desc: &BootstrapDescriptor) -> Output {
        let script = self.path("bootstrap.sh");
        fs::write(&script, render_bootstrap(desc).unwrap()).unwrap();
        Command::new("bash").arg(&script).output().unwrap()
    }
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn test_script_applies_once_across_runs() {
    let host = Host::new();
    let desc = host.descriptor(Fingerprint::compute(SQL));

    let first = host.run(&desc);
    assert_eq!(first.status.code(), Some(0), "{}", stdout(&first));
    assert_eq!(fs::read(host.path("applied.sql")).unwrap(), SQL);
    assert!(desc.paths.marker.exists());
    assert!(!desc.paths.staging.exists());
    assert!(stdout(&first).contains("state=DONE"));

    let second = host.run(&desc);
    assert_eq!(second.status.code(), Some(0), "{}", stdout(&second));
    assert!(stdout(&second).contains("already complete"));
    assert_eq!(fs::read(host.path("applied.sql")).unwrap(), SQL);
}

#[test]
fn test_script_wrong_fingerprint_exits_12() {
    let host = Host::new();
    let desc = host.descriptor(Fingerprint::compute(b"CREATE TABLE u();"));

    let output = host.run(&desc);
    assert_eq!(output.status.code(), Some(12), "{}", stdout(&output));
    assert!(stdout(&output).contains("reason=IntegrityMismatch"));
    assert_eq!(stdout(&output).matches("level=WARN state=VERIFY").count(), 2);
    assert!(!host.path("applied.sql").exists());
    assert!(!desc.paths.marker.exists());
    assert!(!desc.paths.staging.exists());
}

#[test]
fn test_script_missing_source_exits_11_after_bounded_attempts() {
    let host = Host::new();
    fs::remove_file(host.path("store/init_db/latest.sql")).unwrap();
    let desc = host.descriptor(Fingerprint::compute(SQL));

    let output = host.run(&desc);
    assert_eq!(output.status.code(), Some(11), "{}", stdout(&output));
    assert_eq!(stdout(&output).matches("fetch failed").count(), 2);
    assert!(!desc.paths.marker.exists());
}

#[test]
fn test_script_failing_sink_exits_13_and_keeps_staged_file() {
    let host = Host::new();
    let mut desc = host.descriptor(Fingerprint::compute(SQL));
    desc.sink = SinkConfig::Command {
        program: "false".to_string(),
        args: Vec::new(),
    };

    let output = host.run(&desc);
    assert_eq!(output.status.code(), Some(13), "{}", stdout(&output));
    assert!(stdout(&output).contains("reason=ApplyError"));
    assert_eq!(fs::read(&desc.paths.staging).unwrap(), SQL);
    assert!(!desc.paths.marker.exists());
}
