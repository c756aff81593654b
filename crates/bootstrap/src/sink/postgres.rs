//! Postgres sink with a server-side ledger of applied fingerprints.
//!
//! Each apply runs in one transaction that first takes a transaction-scoped
//! advisory lock, so hosts racing on the same database serialize and exactly
//! one executes a given fingerprint.

use super::{ApplyReport, ApplySink};
use crate::error::ApplyError;
use crate::pg::{connect_options, quote_ident};
use async_trait::async_trait;
use ferry_core::{Artifact, DatabaseTarget};
use sqlx::{Connection, Executor};
use sqlx::postgres::PgConnection;
use std::path::Path;
use time::OffsetDateTime;
use tracing::{info, instrument, warn};

/// Advisory lock key shared by every ferry host ("ferry" in ASCII).
pub const LEDGER_LOCK_KEY: i64 = 0x6665_7272_79;

const LEDGER_DDL: &str = "CREATE TABLE IF NOT EXISTS ferry_applied_artifacts (
    fingerprint text PRIMARY KEY,
    applied_at timestamptz NOT NULL DEFAULT now(),
    applied_by text NOT NULL
)";

const TABLE_COUNT_SQL: &str = "SELECT count(*) FROM information_schema.tables \
     WHERE table_type = 'BASE TABLE' \
       AND table_schema NOT IN ('pg_catalog', 'information_schema') \
       AND table_name <> 'ferry_applied_artifacts'";

/// Postgres SQLSTATE for `duplicate_database`.
const DUPLICATE_DATABASE: &str = "42P04";

/// Applies SQL artifacts directly over a Postgres connection.
#[derive(Clone, Debug)]
pub struct PostgresSink {
    target: DatabaseTarget,
    applied_by: String,
}

impl PostgresSink {
    pub fn new(target: DatabaseTarget, applied_by: impl Into<String>) -> Self {
        Self {
            target,
            applied_by: applied_by.into(),
        }
    }

    /// Create the target database through the maintenance database when it
    /// does not exist yet.
    #[instrument(skip(self), fields(database = %self.target.database))]
    pub async fn ensure_database(&self) -> Result<bool, ApplyError> {
        let opts = connect_options(&self.target, &self.target.maintenance_database);
        let mut conn = PgConnection::connect_with(&opts).await?;

        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM pg_database WHERE datname = $1)")
                .bind(&self.target.database)
                .fetch_one(&mut conn)
                .await?;
        if exists {
            conn.close().await?;
            return Ok(false);
        }

        let ddl = format!("CREATE DATABASE {}", quote_ident(&self.target.database));
        let created = match conn.execute(sqlx::raw_sql(&ddl)).await {
            Ok(_) => true,
            // Another host won the race.
            Err(sqlx::Error::Database(e)) if e.code().as_deref() == Some(DUPLICATE_DATABASE) => {
                false
            }
            Err(e) => return Err(e.into()),
        };
        conn.close().await?;
        if created {
            info!("created database");
        }
        Ok(created)
    }

    async fn count_tables(conn: &mut PgConnection) -> Option<i64> {
        match sqlx::query_scalar::<_, i64>(TABLE_COUNT_SQL)
            .fetch_one(conn)
            .await
        {
            Ok(count) => Some(count),
            Err(e) => {
                warn!(error = %e, "could not count tables after apply");
                None
            }
        }
    }
}

#[async_trait]
impl ApplySink for PostgresSink {
    #[instrument(skip_all, fields(fingerprint = %artifact.fingerprint(), database = %self.target.database))]
    async fn apply(&self, artifact: &Artifact, _staged: &Path) -> Result<ApplyReport, ApplyError> {
        let sql = std::str::from_utf8(artifact.bytes()).map_err(|_| ApplyError::Encoding)?;
        let fingerprint = artifact.fingerprint().to_hex();

        if self.target.ensure_database {
            self.ensure_database().await?;
        }

        let opts = connect_options(&self.target, &self.target.database);
        let mut conn = PgConnection::connect_with(&opts).await?;
        let mut tx = conn.begin().await?;

        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(LEDGER_LOCK_KEY)
            .execute(&mut *tx)
            .await?;
        (&mut *tx).execute(sqlx::raw_sql(LEDGER_DDL)).await?;

        let existing: Option<(OffsetDateTime, String)> = sqlx::query_as(
            "SELECT applied_at, applied_by FROM ferry_applied_artifacts WHERE fingerprint = $1",
        )
        .bind(&fingerprint)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some((applied_at, applied_by)) = existing {
            tx.commit().await?;
            conn.close().await?;
            info!(%applied_at, %applied_by, "fingerprint already in ledger, skipping execution");
            return Ok(ApplyReport::AlreadyApplied {
                applied_at,
                applied_by,
            });
        }

        (&mut *tx).execute(sqlx::raw_sql(sql)).await?;
        sqlx::query("INSERT INTO ferry_applied_artifacts (fingerprint, applied_by) VALUES ($1, $2)")
            .bind(&fingerprint)
            .bind(&self.applied_by)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        let table_count = Self::count_tables(&mut conn).await;
        conn.close().await?;
        info!(table_count = ?table_count, "artifact applied");

        Ok(ApplyReport::Applied { table_count })
    }

    fn sink_name(&self) -> &'static str {
        "postgres"
    }
}
