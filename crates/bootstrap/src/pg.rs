//! Postgres connection options shared by the probe and the sink.

use ferry_core::{DatabaseTarget, PgSslMode};
use sqlx::postgres::{PgConnectOptions, PgSslMode as SqlxPgSslMode};

/// Connect options for `database` on the target host. The password is read
/// from the target's password variable at call time.
pub(crate) fn connect_options(target: &DatabaseTarget, database: &str) -> PgConnectOptions {
    let mut opts = PgConnectOptions::new()
        .host(&target.host)
        .port(target.port)
        .username(&target.username)
        .database(database)
        .ssl_mode(match target.ssl_mode {
            PgSslMode::Disable => SqlxPgSslMode::Disable,
            PgSslMode::Prefer => SqlxPgSslMode::Prefer,
            PgSslMode::Require => SqlxPgSslMode::Require,
        });

    if let Some(password) = target.password() {
        opts = opts.password(&password);
    }
    opts
}

/// Quote an identifier for use in DDL.
pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
