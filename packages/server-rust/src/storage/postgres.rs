//! `PostgreSQL` [`DataStore`] backed by `sqlx`.
//!
//! Rows cross the wire as `jsonb`: reads select `to_jsonb(t)` and writes go
//! through `jsonb_populate_record`, so one code path serves every entity
//! table without per-entity statements. Identifiers are never bound; they
//! are checked against the identifier rule and quoted before interpolation.

use anyhow::Context as _;
use async_trait::async_trait;
use serde_json::Value;
use sqlx::PgPool;
use stencil_core::layout::{ID_COLUMN, TENANT_COLUMN};
use stencil_core::naming::is_valid_identifier;
use uuid::Uuid;

use super::{FindQuery, Row};
use crate::traits::DataStore;

pub struct PgDataStore {
    pool: PgPool,
}

impl PgDataStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// # Errors
    ///
    /// Returns an error if the pool cannot connect.
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let pool = PgPool::connect(url)
            .await
            .context("connecting to PostgreSQL")?;
        Ok(Self::new(pool))
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn quote(ident: &str) -> anyhow::Result<String> {
    anyhow::ensure!(is_valid_identifier(ident), "invalid identifier `{ident}`");
    Ok(format!("\"{ident}\""))
}

fn into_row(value: Value) -> anyhow::Result<Row> {
    match value {
        Value::Object(map) => Ok(map),
        other => anyhow::bail!("expected a row object, got {other}"),
    }
}

/// Appends `AND to_jsonb(t.col) = $n` for each filter entry, returning the
/// bound values in placeholder order.
fn filter_clause(sql: &mut String, filter: &Row, first_placeholder: usize) -> anyhow::Result<Vec<Value>> {
    let mut binds = Vec::with_capacity(filter.len());
    for (i, (column, value)) in filter.iter().enumerate() {
        sql.push_str(&format!(
            " AND to_jsonb(t.{}) = ${}",
            quote(column)?,
            first_placeholder + i
        ));
        binds.push(value.clone());
    }
    Ok(binds)
}

#[async_trait]
impl DataStore for PgDataStore {
    async fn find_many(
        &self,
        tenant: &str,
        table: &str,
        query: &FindQuery,
    ) -> anyhow::Result<Vec<Row>> {
        let mut sql = format!(
            "SELECT to_jsonb(t) FROM {} t WHERE t.{} = $1",
            quote(table)?,
            quote(TENANT_COLUMN)?
        );
        let binds = filter_clause(&mut sql, &query.filter, 2)?;
        if let Some(order) = &query.order_by {
            sql.push_str(&format!(
                " ORDER BY t.{} {}",
                quote(&order.column)?,
                order.direction.sql()
            ));
        }
        if let Some(limit) = query.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        if query.offset > 0 {
            sql.push_str(&format!(" OFFSET {}", query.offset));
        }

        let mut q = sqlx::query_scalar::<_, Value>(&sql).bind(tenant);
        for value in binds {
            q = q.bind(value);
        }
        let rows = q.fetch_all(&self.pool).await?;
        rows.into_iter().map(into_row).collect()
    }

    async fn find_by_id(&self, tenant: &str, table: &str, id: &str) -> anyhow::Result<Option<Row>> {
        let Ok(id) = Uuid::parse_str(id) else {
            return Ok(None);
        };
        let sql = format!(
            "SELECT to_jsonb(t) FROM {} t WHERE t.{} = $1 AND t.{} = $2",
            quote(table)?,
            quote(ID_COLUMN)?,
            quote(TENANT_COLUMN)?
        );
        let row = sqlx::query_scalar::<_, Value>(&sql)
            .bind(id)
            .bind(tenant)
            .fetch_optional(&self.pool)
            .await?;
        row.map(into_row).transpose()
    }

    async fn create(&self, tenant: &str, table: &str, mut row: Row) -> anyhow::Result<Row> {
        row.insert(TENANT_COLUMN.to_string(), Value::String(tenant.to_string()));
        if !row.contains_key(ID_COLUMN) {
            row.insert(ID_COLUMN.to_string(), Value::String(Uuid::new_v4().to_string()));
        }
        let columns = row
            .keys()
            .map(|c| quote(c))
            .collect::<anyhow::Result<Vec<_>>>()?
            .join(", ");
        let table = quote(table)?;
        let sql = format!(
            "INSERT INTO {table} AS t ({columns}) \
             SELECT {columns} FROM jsonb_populate_record(NULL::{table}, $1) \
             RETURNING to_jsonb(t)"
        );
        let stored = sqlx::query_scalar::<_, Value>(&sql)
            .bind(Value::Object(row))
            .fetch_one(&self.pool)
            .await?;
        into_row(stored)
    }

    async fn update(
        &self,
        tenant: &str,
        table: &str,
        id: &str,
        changes: Row,
    ) -> anyhow::Result<Option<Row>> {
        let Ok(id) = Uuid::parse_str(id) else {
            return Ok(None);
        };
        if changes.is_empty() {
            return self.find_by_id(tenant, table, &id.to_string()).await;
        }
        let assignments = changes
            .keys()
            .map(|c| quote(c).map(|q| format!("{q} = r.{q}")))
            .collect::<anyhow::Result<Vec<_>>>()?
            .join(", ");
        let table = quote(table)?;
        let sql = format!(
            "UPDATE {table} AS t SET {assignments} \
             FROM jsonb_populate_record(NULL::{table}, $1) AS r \
             WHERE t.{} = $2 AND t.{} = $3 \
             RETURNING to_jsonb(t)",
            quote(ID_COLUMN)?,
            quote(TENANT_COLUMN)?
        );
        let row = sqlx::query_scalar::<_, Value>(&sql)
            .bind(Value::Object(changes))
            .bind(id)
            .bind(tenant)
            .fetch_optional(&self.pool)
            .await?;
        row.map(into_row).transpose()
    }

    async fn delete(&self, tenant: &str, table: &str, id: &str) -> anyhow::Result<bool> {
        let Ok(id) = Uuid::parse_str(id) else {
            return Ok(false);
        };
        let sql = format!(
            "DELETE FROM {} WHERE {} = $1 AND {} = $2",
            quote(table)?,
            quote(ID_COLUMN)?,
            quote(TENANT_COLUMN)?
        );
        let result = sqlx::query(&sql)
            .bind(id)
            .bind(tenant)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn count(&self, tenant: &str, table: &str, filter: &Row) -> anyhow::Result<u64> {
        let mut sql = format!(
            "SELECT COUNT(*) FROM {} t WHERE t.{} = $1",
            quote(table)?,
            quote(TENANT_COLUMN)?
        );
        let binds = filter_clause(&mut sql, filter, 2)?;
        let mut q = sqlx::query_scalar::<_, i64>(&sql).bind(tenant);
        for value in binds {
            q = q.bind(value);
        }
        let n = q.fetch_one(&self.pool).await?;
        Ok(u64::try_from(n).unwrap_or_default())
    }
}
