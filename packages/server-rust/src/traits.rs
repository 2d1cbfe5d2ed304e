use async_trait::async_trait;
use stencil_core::ColumnInfo;

use crate::audit::AuditRecord;
use crate::schema::SchemaChange;
use crate::storage::{FindQuery, Row};

/// Pluggable relational backend for entity records.
/// Implementations: `PostgreSQL` (feature `postgres`), memory (tests, demos).
///
/// Rows are keyed by column name. Every method takes the tenant explicitly
/// and must never read or write rows belonging to another tenant; callers
/// reach it only through [`TenantData`](crate::storage::TenantData).
#[async_trait]
pub trait DataStore: Send + Sync {
    /// Rows matching `query.filter` (column equality), sorted and paged.
    async fn find_many(&self, tenant: &str, table: &str, query: &FindQuery)
        -> anyhow::Result<Vec<Row>>;

    /// Load a single row by id.
    async fn find_by_id(&self, tenant: &str, table: &str, id: &str) -> anyhow::Result<Option<Row>>;

    /// Insert a row and return it as stored.
    async fn create(&self, tenant: &str, table: &str, row: Row) -> anyhow::Result<Row>;

    /// Overwrite the given columns of a row. `None` if the row does not exist.
    async fn update(
        &self,
        tenant: &str,
        table: &str,
        id: &str,
        changes: Row,
    ) -> anyhow::Result<Option<Row>>;

    /// Delete a row. Returns whether a row was removed.
    async fn delete(&self, tenant: &str, table: &str, id: &str) -> anyhow::Result<bool>;

    /// Number of rows matching `filter` (column equality).
    async fn count(&self, tenant: &str, table: &str, filter: &Row) -> anyhow::Result<u64>;
}

/// Live relational schema, as seen by the schema evolution engine.
///
/// Nothing read from a catalog is cached between passes.
#[async_trait]
pub trait SchemaCatalog: Send + Sync {
    async fn table_exists(&self, table: &str) -> anyhow::Result<bool>;

    /// Columns currently present on `table`, in physical order.
    async fn columns(&self, table: &str) -> anyhow::Result<Vec<ColumnInfo>>;

    /// Apply a single change to the live schema.
    async fn apply(&self, change: &SchemaChange) -> anyhow::Result<()>;
}

/// Durable destination for per-dispatch audit records.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, entry: &AuditRecord) -> anyhow::Result<()>;
}
