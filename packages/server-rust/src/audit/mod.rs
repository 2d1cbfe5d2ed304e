//! Per-dispatch audit records and the sinks that persist them.
//!
//! Every dispatch, successful or not, produces one [`AuditRecord`]. The
//! audit layer hands it to an [`AuditSink`] on a spawned task; sink failures
//! are logged and never reach the caller.

#[cfg(feature = "postgres")]
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use stencil_core::CallerKind;
use tracing::info;
use uuid::Uuid;

use crate::service::operation::ErrorKind;
use crate::traits::AuditSink;

#[cfg(feature = "postgres")]
pub use postgres::PgAuditSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Failure { kind: ErrorKind },
}

impl AuditOutcome {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure { kind } => kind.as_str(),
        }
    }

    #[must_use]
    pub fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    pub id: Uuid,
    pub action: String,
    pub tenant_id: String,
    pub user_id: String,
    pub caller_kind: CallerKind,
    pub outcome: AuditOutcome,
    /// Caller-safe error text; never internal detail.
    pub error: Option<String>,
    pub duration_ms: u64,
    pub at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// TracingAuditSink
// ---------------------------------------------------------------------------

/// Writes audit records to the `stencil::audit` tracing target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, entry: &AuditRecord) -> anyhow::Result<()> {
        info!(
            target: "stencil::audit",
            audit_id = %entry.id,
            action = %entry.action,
            tenant = %entry.tenant_id,
            user = %entry.user_id,
            caller_kind = entry.caller_kind.as_str(),
            outcome = entry.outcome.as_str(),
            duration_ms = entry.duration_ms,
            "dispatch audited"
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryAuditSink
// ---------------------------------------------------------------------------

/// Keeps audit records in memory, for tests and the CLI.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().clone()
    }

    pub fn clear(&self) {
        self.records.lock().clear();
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn record(&self, entry: &AuditRecord) -> anyhow::Result<()> {
        self.records.lock().push(entry.clone());
        Ok(())
    }
}
