//! `PostgreSQL` audit sink writing to `stencil_audit_log`.

use async_trait::async_trait;
use sqlx::PgPool;

use super::AuditRecord;
use crate::traits::AuditSink;

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS stencil_audit_log (
    id UUID PRIMARY KEY,
    action TEXT NOT NULL,
    tenant_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    caller_kind TEXT NOT NULL,
    outcome TEXT NOT NULL,
    error TEXT,
    duration_ms BIGINT NOT NULL,
    at TIMESTAMPTZ NOT NULL
)";

const INSERT: &str = "INSERT INTO stencil_audit_log
    (id, action, tenant_id, user_id, caller_kind, outcome, error, duration_ms, at)
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)";

pub struct PgAuditSink {
    pool: PgPool,
}

impl PgAuditSink {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Creates the audit table if it is missing.
    ///
    /// # Errors
    ///
    /// Propagates database failures.
    pub async fn initialize(&self) -> anyhow::Result<()> {
        sqlx::query(CREATE_TABLE).execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl AuditSink for PgAuditSink {
    async fn record(&self, entry: &AuditRecord) -> anyhow::Result<()> {
        sqlx::query(INSERT)
            .bind(entry.id)
            .bind(&entry.action)
            .bind(&entry.tenant_id)
            .bind(&entry.user_id)
            .bind(entry.caller_kind.as_str())
            .bind(entry.outcome.as_str())
            .bind(entry.error.as_deref())
            .bind(i64::try_from(entry.duration_ms).unwrap_or(i64::MAX))
            .bind(entry.at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
