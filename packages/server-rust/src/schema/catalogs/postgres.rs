//! `PostgreSQL` schema catalog reading `information_schema` on every call.

use async_trait::async_trait;
use sqlx::PgPool;
use stencil_core::ColumnInfo;

use crate::schema::SchemaChange;
use crate::traits::SchemaCatalog;

pub struct PgSchemaCatalog {
    pool: PgPool,
}

impl PgSchemaCatalog {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SchemaCatalog for PgSchemaCatalog {
    async fn table_exists(&self, table: &str) -> anyhow::Result<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (
                SELECT 1 FROM information_schema.tables
                WHERE table_schema = current_schema() AND table_name = $1
            )",
        )
        .bind(table)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn columns(&self, table: &str) -> anyhow::Result<Vec<ColumnInfo>> {
        let rows = sqlx::query_as::<_, (String, String, Option<i32>)>(
            "SELECT column_name::text, data_type::text, character_maximum_length::int
             FROM information_schema.columns
             WHERE table_schema = current_schema() AND table_name = $1
             ORDER BY ordinal_position",
        )
        .bind(table)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(name, data_type, max_length)| ColumnInfo {
                name,
                data_type,
                max_length: max_length.and_then(|n| u32::try_from(n).ok()),
            })
            .collect())
    }

    async fn apply(&self, change: &SchemaChange) -> anyhow::Result<()> {
        let sql = change.to_sql()?;
        sqlx::query(&sql).execute(&self.pool).await?;
        Ok(())
    }
}
