//! The bootstrap descriptor.
//!
//! A descriptor is generated once per release and fixes everything a host
//! needs to fetch, verify and apply the artifact: where it lives, what its
//! fingerprint must be, how to wait for the database and how to apply it.
//! Both the native runner and the rendered shell script are driven by it.

use crate::config::{BootstrapConfig, StorageConfig};
use crate::hash::Fingerprint;
use crate::retry::{ReadinessPolicy, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// PostgreSQL SSL mode.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PgSslMode {
    /// Disable SSL/TLS entirely.
    Disable,
    /// Prefer SSL/TLS but allow unencrypted connections (default).
    #[default]
    Prefer,
    /// Require SSL/TLS for all connections.
    Require,
}

impl PgSslMode {
    /// The libpq `sslmode` value.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disable => "disable",
            Self::Prefer => "prefer",
            Self::Require => "require",
        }
    }
}

/// The database the artifact is applied to.
///
/// Never carries a password: the password is read at run time from the
/// environment variable named by `password_env`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DatabaseTarget {
    pub host: String,
    #[serde(default = "default_pg_port")]
    pub port: u16,
    pub database: String,
    pub username: String,
    /// Environment variable holding the password (default: `PGPASSWORD`).
    #[serde(default = "default_password_env")]
    pub password_env: String,
    #[serde(default)]
    pub ssl_mode: PgSslMode,
    /// Create `database` through `maintenance_database` before applying.
    #[serde(default)]
    pub ensure_database: bool,
    #[serde(default = "default_maintenance_database")]
    pub maintenance_database: String,
}

fn default_pg_port() -> u16 {
    5432
}

fn default_password_env() -> String {
    "PGPASSWORD".to_string()
}

fn default_maintenance_database() -> String {
    "postgres".to_string()
}

impl DatabaseTarget {
    /// Target with default port, password variable and SSL mode.
    pub fn new(
        host: impl Into<String>,
        database: impl Into<String>,
        username: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port: default_pg_port(),
            database: database.into(),
            username: username.into(),
            password_env: default_password_env(),
            ssl_mode: PgSslMode::default(),
            ensure_database: false,
            maintenance_database: default_maintenance_database(),
        }
    }

    /// Read the password from the configured environment variable.
    pub fn password(&self) -> Option<String> {
        std::env::var(&self.password_env).ok()
    }

    /// Validate target invariants.
    pub fn validate(&self) -> Result<(), String> {
        if self.host.trim().is_empty() {
            return Err("database.host must not be empty".to_string());
        }
        if self.database.trim().is_empty() {
            return Err("database.database must not be empty".to_string());
        }
        if self.username.trim().is_empty() {
            return Err("database.username must not be empty".to_string());
        }
        if self.port == 0 {
            return Err("database.port must not be 0".to_string());
        }
        if !is_valid_env_name(&self.password_env) {
            return Err(format!(
                "database.password_env {:?} is not a valid environment variable name",
                self.password_env
            ));
        }
        if self.ensure_database && self.maintenance_database.trim().is_empty() {
            return Err(
                "database.maintenance_database is required when ensure_database is set"
                    .to_string(),
            );
        }
        Ok(())
    }
}

/// Whether `name` is a portable shell identifier (`[A-Za-z_][A-Za-z0-9_]*`).
pub fn is_valid_env_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// How database readiness is checked.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProbeKind {
    /// TCP connect to `host:port` (what `pg_isready` checks).
    #[default]
    Tcp,
    /// Authenticated connection followed by `SELECT 1`.
    Postgres,
}

/// Where the artifact is applied.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SinkConfig {
    /// Execute inside one transaction on the descriptor's database, recording
    /// the fingerprint in a ledger table.
    #[default]
    Postgres,
    /// Run an external program. Every `{artifact}` in `args` is replaced by
    /// the staged file path.
    Command {
        program: String,
        #[serde(default)]
        args: Vec<String>,
    },
}

/// Placeholder replaced with the staged artifact path in command arguments.
pub const ARTIFACT_PLACEHOLDER: &str = "{artifact}";

/// Host-local files used by a bootstrap run.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct HostPaths {
    /// Completion marker; its presence gates re-execution.
    #[serde(default = "default_marker_path")]
    pub marker: PathBuf,
    /// Where fetched bytes are staged before apply.
    #[serde(default = "default_staging_path")]
    pub staging: PathBuf,
    /// Plain-text run log.
    #[serde(default = "default_log_path")]
    pub log_file: PathBuf,
}

fn default_marker_path() -> PathBuf {
    PathBuf::from("/var/lib/ferry/init_db.done")
}

fn default_staging_path() -> PathBuf {
    PathBuf::from("/var/lib/ferry/init_db.sql")
}

fn default_log_path() -> PathBuf {
    PathBuf::from("/var/log/ferry-bootstrap.log")
}

impl Default for HostPaths {
    fn default() -> Self {
        Self {
            marker: default_marker_path(),
            staging: default_staging_path(),
            log_file: default_log_path(),
        }
    }
}

impl HostPaths {
    /// All three paths placed under `dir`.
    pub fn under(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            marker: dir.join("init_db.done"),
            staging: dir.join("init_db.sql"),
            log_file: dir.join("bootstrap.log"),
        }
    }

    fn validate(&self) -> Result<(), String> {
        for (name, path) in [
            ("marker", &self.marker),
            ("staging", &self.staging),
            ("log_file", &self.log_file),
        ] {
            if path.as_os_str().is_empty() {
                return Err(format!("paths.{name} must not be empty"));
            }
        }
        if self.marker == self.staging {
            return Err("paths.marker and paths.staging must differ".to_string());
        }
        Ok(())
    }
}

/// Everything a host needs to fetch, verify and apply one release.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct BootstrapDescriptor {
    /// Mutable alias the artifact is fetched from.
    pub alias_key: String,
    /// Fingerprint fixed at generation time.
    pub expected_fingerprint: Fingerprint,
    /// Storage location. Never carries credentials.
    pub source: StorageConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<DatabaseTarget>,
    #[serde(default)]
    pub probe: ProbeKind,
    #[serde(default)]
    pub sink: SinkConfig,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub readiness: ReadinessPolicy,
    #[serde(default)]
    pub paths: HostPaths,
}

impl BootstrapDescriptor {
    /// Build a descriptor from configured bootstrap defaults.
    ///
    /// Credentials in `source` are dropped.
    pub fn new(
        alias_key: impl Into<String>,
        expected_fingerprint: Fingerprint,
        source: &StorageConfig,
        bootstrap: &BootstrapConfig,
    ) -> Self {
        Self {
            alias_key: alias_key.into(),
            expected_fingerprint,
            source: source.without_credentials(),
            database: bootstrap.database.clone(),
            probe: bootstrap.probe,
            sink: bootstrap.sink.clone(),
            retry: bootstrap.retry,
            readiness: bootstrap.readiness,
            paths: bootstrap.paths.clone(),
        }
    }

    /// Validate descriptor invariants.
    pub fn validate(&self) -> crate::Result<()> {
        self.check().map_err(crate::Error::InvalidDescriptor)
    }

    fn check(&self) -> Result<(), String> {
        if self.alias_key.trim().is_empty() {
            return Err("alias_key must not be empty".to_string());
        }
        if self.alias_key.starts_with('/') {
            return Err(format!(
                "alias_key must be relative: {:?}",
                self.alias_key
            ));
        }
        self.source.validate()?;
        if self.source.has_credentials() {
            return Err("source must not carry credentials".to_string());
        }
        if let Some(database) = &self.database {
            database.validate()?;
        }
        match &self.sink {
            SinkConfig::Postgres if self.database.is_none() => {
                return Err("postgres sink requires a database target".to_string());
            }
            SinkConfig::Command { program, .. } if program.trim().is_empty() => {
                return Err("command sink requires a program".to_string());
            }
            _ => {}
        }
        self.retry.validate()?;
        self.readiness.validate()?;
        self.paths.validate()?;
        Ok(())
    }

    /// Serialize as TOML.
    pub fn to_toml(&self) -> crate::Result<String> {
        toml::to_string_pretty(self).map_err(|e| crate::Error::Serialization(e.to_string()))
    }

    /// Parse and validate a TOML descriptor.
    pub fn from_toml(s: &str) -> crate::Result<Self> {
        let descriptor: Self =
            toml::from_str(s).map_err(|e| crate::Error::Serialization(e.to_string()))?;
        descriptor.validate()?;
        Ok(descriptor)
    }
}
