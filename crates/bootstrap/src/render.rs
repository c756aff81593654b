//! Render a descriptor as a standalone bash bootstrap script.
//!
//! The script follows the same states, backoff and exit codes as
//! [`crate::Bootstrapper`], using `aws`/`cp`, `sha256sum`, `pg_isready` and
//! `psql` on the target host. Output depends only on the descriptor.

use crate::error::{FailureReason, RenderError};
use crate::templates;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use ferry_core::{
    ARTIFACT_PLACEHOLDER, Backoff, BootstrapDescriptor, DatabaseTarget, ProbeKind, SinkConfig,
    StorageConfig,
};
use std::path::Path;

/// Escape a string for safe use as a shell argument.
///
/// Uses single-quoting with embedded single quotes escaped via the
/// `'\''` idiom (end quote, literal quote, start quote).
pub fn escape_shell_arg(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}

/// Substitute `{name}` placeholders in one pass, so substituted values are
/// never rescanned. Unknown `{...}` sequences are left as they are.
fn fill(template: &str, values: &[(&str, String)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let tail = &rest[open..];
        let replaced = tail.find('}').and_then(|close| {
            let name = &tail[1..close];
            values
                .iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| (close, value.as_str()))
        });
        match replaced {
            Some((close, value)) => {
                out.push_str(value);
                rest = &tail[close + 1..];
            }
            None => {
                out.push('{');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn utf8(path: &Path) -> Result<&str, RenderError> {
    path.to_str()
        .ok_or_else(|| RenderError::NonUtf8Path(path.to_path_buf()))
}

/// Render the bootstrap script for a descriptor.
pub fn render_bootstrap(descriptor: &BootstrapDescriptor) -> Result<String, RenderError> {
    descriptor.validate()?;

    let retry = &descriptor.retry;
    let database_env = descriptor
        .database
        .as_ref()
        .map(database_env)
        .unwrap_or_default();
    let wait_dependency = descriptor
        .database
        .as_ref()
        .map(|db| wait_dependency(descriptor, db))
        .unwrap_or_default();

    Ok(fill(
        templates::BOOTSTRAP_SCRIPT,
        &[
            ("alias_key", escape_shell_arg(&descriptor.alias_key)),
            ("expected", escape_shell_arg(&descriptor.expected_fingerprint.to_hex())),
            ("marker", escape_shell_arg(utf8(&descriptor.paths.marker)?)),
            ("staging", escape_shell_arg(utf8(&descriptor.paths.staging)?)),
            ("log_file", escape_shell_arg(utf8(&descriptor.paths.log_file)?)),
            ("max_attempts", retry.max_attempts.to_string()),
            ("initial_delay", retry.delay_secs_for(1).to_string()),
            ("database_env", database_env),
            ("wait_dependency", wait_dependency),
            ("fetch_command", fetch_command(descriptor)?),
            ("next_delay", next_delay(descriptor)),
            ("apply_section", apply_section(descriptor)),
            ("exit_fetch", FailureReason::FetchExhausted.exit_code().to_string()),
            ("exit_verify", FailureReason::IntegrityMismatch.exit_code().to_string()),
        ],
    ))
}

/// Base64 of [`render_bootstrap`], for cloud-init user data fields.
pub fn render_user_data(descriptor: &BootstrapDescriptor) -> Result<String, RenderError> {
    Ok(STANDARD.encode(render_bootstrap(descriptor)?))
}

fn database_env(db: &DatabaseTarget) -> String {
    // password_env is validated as a shell identifier.
    let password_export = if db.password_env == "PGPASSWORD" {
        String::new()
    } else {
        format!(
            "if [ -n \"${{{var}:-}}\" ]; then export PGPASSWORD=\"${var}\"; fi\n",
            var = db.password_env
        )
    };
    fill(
        templates::DATABASE_ENV,
        &[
            ("host", escape_shell_arg(&db.host)),
            ("port", db.port.to_string()),
            ("database", escape_shell_arg(&db.database)),
            ("username", escape_shell_arg(&db.username)),
            ("ssl_mode", db.ssl_mode.as_str().to_string()),
            ("password_export", password_export),
        ],
    )
}

fn wait_dependency(descriptor: &BootstrapDescriptor, db: &DatabaseTarget) -> String {
    let readiness = &descriptor.readiness;
    let timeout = readiness.connect_timeout_secs;
    let probe_command = match descriptor.probe {
        ProbeKind::Tcp => format!("pg_isready -t {timeout}"),
        ProbeKind::Postgres => {
            let database = if db.ensure_database {
                &db.maintenance_database
            } else {
                &db.database
            };
            format!(
                "PGCONNECT_TIMEOUT={timeout} psql --no-psqlrc -tA -d {} -c 'SELECT 1'",
                escape_shell_arg(database)
            )
        }
    };
    fill(
        templates::WAIT_DEPENDENCY,
        &[
            ("probe_command", probe_command),
            ("attempts", readiness.max_attempts.to_string()),
            ("interval", readiness.interval_secs.to_string()),
            (
                "exit_dependency",
                FailureReason::DependencyUnavailable.exit_code().to_string(),
            ),
        ],
    )
}

fn fetch_command(descriptor: &BootstrapDescriptor) -> Result<String, RenderError> {
    match &descriptor.source {
        StorageConfig::Filesystem { path } => {
            let source = path.join(&descriptor.alias_key);
            Ok(format!(
                "cp -- {} \"$STAGING\"",
                escape_shell_arg(utf8(&source)?)
            ))
        }
        StorageConfig::S3 {
            bucket,
            endpoint,
            region,
            prefix,
            ..
        } => {
            let key = match prefix.as_deref().map(|p| p.trim_matches('/')) {
                Some(p) if !p.is_empty() => format!("{p}/{}", descriptor.alias_key),
                _ => descriptor.alias_key.clone(),
            };
            let mut command = String::from("aws s3 cp --only-show-errors");
            if let Some(endpoint) = endpoint {
                command.push_str(" --endpoint-url ");
                command.push_str(&escape_shell_arg(endpoint));
            }
            if let Some(region) = region {
                command.push_str(" --region ");
                command.push_str(&escape_shell_arg(region));
            }
            command.push(' ');
            command.push_str(&escape_shell_arg(&format!("s3://{bucket}/{key}")));
            command.push_str(" \"$STAGING\"");
            Ok(command)
        }
    }
}

fn next_delay(descriptor: &BootstrapDescriptor) -> String {
    let retry = &descriptor.retry;
    let mut out = match retry.backoff {
        Backoff::Linear { increment_secs } => format!("  delay=$((delay + {increment_secs}))"),
        Backoff::Exponential { factor } => format!("  delay=$((delay * {factor}))"),
    };
    if let Some(cap) = retry.max_delay_secs {
        out.push_str(&format!(
            "\n  if [ \"$delay\" -gt {cap} ]; then delay={cap}; fi"
        ));
    }
    out
}

fn apply_section(descriptor: &BootstrapDescriptor) -> String {
    let exit_apply = FailureReason::ApplyError.exit_code().to_string();
    match &descriptor.sink {
        SinkConfig::Postgres => {
            let ensure_database = match &descriptor.database {
                Some(db) if db.ensure_database => fill(
                    templates::ENSURE_DATABASE,
                    &[
                        ("maintenance", escape_shell_arg(&db.maintenance_database)),
                        ("database", escape_shell_arg(&db.database)),
                        ("exit_apply", exit_apply.clone()),
                    ],
                ),
                _ => String::new(),
            };
            fill(
                templates::APPLY_PSQL,
                &[
                    ("ensure_database", ensure_database),
                    ("exit_apply", exit_apply.clone()),
                ],
            )
        }
        SinkConfig::Command { program, args } => {
            let mut words = vec![escape_shell_arg(program)];
            words.extend(args.iter().map(|arg| command_word(arg)));
            fill(
                templates::APPLY_COMMAND,
                &[("command", words.join(" ")), ("exit_apply", exit_apply)],
            )
        }
    }
}

/// Quote one argument, with `{artifact}` expanding to `"$STAGING"`.
fn command_word(arg: &str) -> String {
    if arg.is_empty() {
        return "''".to_string();
    }
    arg.split(ARTIFACT_PLACEHOLDER)
        .map(|piece| {
            if piece.is_empty() {
                String::new()
            } else {
                escape_shell_arg(piece)
            }
        })
        .collect::<Vec<_>>()
        .join("\"$STAGING\"")
}
