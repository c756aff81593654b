//! Readiness probes for the dependent database.

use crate::pg::connect_options;
use async_trait::async_trait;
use ferry_core::{DatabaseTarget, ProbeKind};
use sqlx::Connection;
use sqlx::postgres::PgConnection;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::debug;

/// A single, bounded readiness check.
#[async_trait]
pub trait ReadinessProbe: Send + Sync {
    async fn is_ready(&self, target: &DatabaseTarget) -> bool;
}

/// Ready once the port accepts TCP connections.
#[derive(Clone, Debug)]
pub struct TcpProbe {
    timeout: Duration,
}

impl TcpProbe {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl ReadinessProbe for TcpProbe {
    async fn is_ready(&self, target: &DatabaseTarget) -> bool {
        let connect = TcpStream::connect((target.host.as_str(), target.port));
        match tokio::time::timeout(self.timeout, connect).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                debug!(host = %target.host, port = target.port, error = %e, "tcp probe refused");
                false
            }
            Err(_) => {
                debug!(host = %target.host, port = target.port, "tcp probe timed out");
                false
            }
        }
    }
}

/// Ready once an authenticated `SELECT 1` succeeds.
#[derive(Clone, Debug)]
pub struct PostgresProbe {
    timeout: Duration,
}

impl PostgresProbe {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    async fn select_one(target: &DatabaseTarget) -> Result<(), sqlx::Error> {
        // The target database may not exist yet when the sink creates it.
        let database = if target.ensure_database {
            &target.maintenance_database
        } else {
            &target.database
        };
        let mut conn = PgConnection::connect_with(&connect_options(target, database)).await?;
        sqlx::query("SELECT 1").execute(&mut conn).await?;
        conn.close().await
    }
}

#[async_trait]
impl ReadinessProbe for PostgresProbe {
    async fn is_ready(&self, target: &DatabaseTarget) -> bool {
        match tokio::time::timeout(self.timeout, Self::select_one(target)).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                debug!(host = %target.host, error = %e, "postgres probe failed");
                false
            }
            Err(_) => {
                debug!(host = %target.host, "postgres probe timed out");
                false
            }
        }
    }
}

/// Build the probe named by a descriptor.
pub fn from_kind(kind: ProbeKind, timeout: Duration) -> Arc<dyn ReadinessProbe> {
    match kind {
        ProbeKind::Tcp => Arc::new(TcpProbe::new(timeout)),
        ProbeKind::Postgres => Arc::new(PostgresProbe::new(timeout)),
    }
}
