//! Bash templates for rendered bootstrap scripts.
//!
//! Placeholders are `{name}`; every value substituted into them is already
//! shell-quoted or a validated number.

/// Script skeleton.
///
/// Placeholders:
/// - `{alias_key}`, `{expected}`, `{marker}`, `{staging}`, `{log_file}` - quoted values
/// - `{max_attempts}`, `{initial_delay}` - retry policy numbers
/// - `{database_env}` - libpq exports (empty without a database)
/// - `{wait_dependency}` - readiness section (empty without a database)
/// - `{fetch_command}` - writes the artifact to `"$STAGING"`
/// - `{next_delay}` - updates `$delay` after a failed attempt
/// - `{apply_section}` - executes `"$STAGING"`
/// - `{exit_fetch}`, `{exit_verify}` - failure exit codes
pub const BOOTSTRAP_SCRIPT: &str = r#"#!/usr/bin/env bash
# Generated by ferryctl render.
set -uo pipefail

ALIAS_KEY={alias_key}
EXPECTED_SHA256={expected}
MARKER={marker}
STAGING={staging}
LOG_FILE={log_file}
MAX_ATTEMPTS={max_attempts}

if mkdir -p "$(dirname "$LOG_FILE")" 2>/dev/null; then
  exec > >(tee -a "$LOG_FILE") 2>&1
fi

log() {
  printf '%s level=%s %s\n' "$(date -u +%Y-%m-%dT%H:%M:%SZ)" "$1" "$2"
}

fail() {
  log ERROR "state=$1 reason=$2"
  exit "$3"
}

log INFO "state=START alias_key=$ALIAS_KEY"
if [ -e "$MARKER" ]; then
  log INFO "state=DONE marker=$MARKER already complete; remove it (ferryctl bootstrap reset) to re-run"
  exit 0
fi
{database_env}{wait_dependency}
mkdir -p "$(dirname "$STAGING")" "$(dirname "$MARKER")"
expected=$(printf '%s' "$EXPECTED_SHA256" | tr 'A-F' 'a-f')
delay={initial_delay}
attempt=1
last_reason=FetchExhausted
while :; do
  log INFO "state=FETCH attempt=$attempt max_attempts=$MAX_ATTEMPTS"
  rm -f "$STAGING"
  if (umask 077 && {fetch_command}); then
    actual=$(sha256sum "$STAGING" | cut -d' ' -f1 | tr 'A-F' 'a-f')
    if [ "$actual" = "$expected" ]; then
      log INFO "state=VERIFY sha256=$actual"
      break
    fi
    log WARN "state=VERIFY attempt=$attempt expected=$expected actual=$actual"
    rm -f "$STAGING"
    last_reason=IntegrityMismatch
  else
    log WARN "state=FETCH attempt=$attempt fetch failed"
    last_reason=FetchExhausted
  fi
  if [ "$attempt" -ge "$MAX_ATTEMPTS" ]; then
    if [ "$last_reason" = IntegrityMismatch ]; then
      fail VERIFY IntegrityMismatch {exit_verify}
    fi
    fail FETCH FetchExhausted {exit_fetch}
  fi
  log INFO "state=FETCH retry_in=${delay}s"
  sleep "$delay"
{next_delay}
  attempt=$((attempt + 1))
done
{apply_section}
date -u +%Y-%m-%dT%H:%M:%SZ > "$MARKER" || {
  log ERROR "state=DONE marker write failed"
  exit 1
}
rm -f "$STAGING"
log INFO "state=DONE marker=$MARKER"
"#;

/// Readiness polling.
///
/// Placeholders:
/// - `{probe_command}` - exits 0 when the database is ready
/// - `{attempts}`, `{interval}` - readiness policy numbers
/// - `{exit_dependency}` - failure exit code
pub const WAIT_DEPENDENCY: &str = r#"
log INFO "state=WAIT_DEPENDENCY host=$PGHOST port=$PGPORT"
ready=0
i=1
while [ "$i" -le {attempts} ]; do
  if {probe_command} >/dev/null 2>&1; then
    ready=1
    break
  fi
  log INFO "state=WAIT_DEPENDENCY attempt=$i max_attempts={attempts} not ready"
  if [ "$i" -lt {attempts} ]; then
    sleep {interval}
  fi
  i=$((i + 1))
done
if [ "$ready" != 1 ]; then
  fail WAIT_DEPENDENCY DependencyUnavailable {exit_dependency}
fi
"#;

/// libpq connection environment.
///
/// Placeholders:
/// - `{host}`, `{port}`, `{database}`, `{username}`, `{ssl_mode}` - quoted values
/// - `{password_export}` - copies the password variable into `PGPASSWORD`
pub const DATABASE_ENV: &str = r#"
export PGHOST={host} PGPORT={port} PGDATABASE={database} PGUSER={username} PGSSLMODE={ssl_mode}
{password_export}"#;

/// Apply through `psql` in one transaction.
///
/// Placeholders:
/// - `{ensure_database}` - optional database creation
/// - `{exit_apply}` - failure exit code
pub const APPLY_PSQL: &str = r#"
log INFO "state=APPLY sink=postgres"
{ensure_database}if ! psql --no-psqlrc --single-transaction -v ON_ERROR_STOP=1 -f "$STAGING"; then
  fail APPLY ApplyError {exit_apply}
fi
tables=$(psql --no-psqlrc -tA -c "SELECT count(*) FROM information_schema.tables WHERE table_type = 'BASE TABLE' AND table_schema NOT IN ('pg_catalog', 'information_schema')" 2>/dev/null || echo unknown)
log INFO "state=APPLY tables=$tables"
"#;

/// Create the target database through the maintenance database.
///
/// Placeholders:
/// - `{maintenance}`, `{database}` - quoted database names
/// - `{exit_apply}` - failure exit code
pub const ENSURE_DATABASE: &str = r#"if ! printf '%s\n' "SELECT 1 FROM pg_database WHERE datname = :'target'" | psql --no-psqlrc -tA -d {maintenance} -v target={database} | grep -q 1; then
  log INFO "state=APPLY creating database"
  createdb --maintenance-db={maintenance} -- {database} || fail APPLY ApplyError {exit_apply}
fi
"#;

/// Apply through a configured command.
///
/// Placeholders:
/// - `{command}` - quoted program and arguments
/// - `{exit_apply}` - failure exit code
pub const APPLY_COMMAND: &str = r#"
log INFO "state=APPLY sink=command"
if ! {command}; then
  fail APPLY ApplyError {exit_apply}
fi
"#;
