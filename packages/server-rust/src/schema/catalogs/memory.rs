//! In-memory schema catalog.
//!
//! Keeps a column list per table and a log of every statement applied, so
//! tests can assert on exactly what would have reached the database.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use stencil_core::ColumnInfo;

use crate::schema::SchemaChange;
use crate::traits::SchemaCatalog;

#[derive(Debug, Default)]
pub struct MemorySchemaCatalog {
    tables: DashMap<String, Vec<ColumnInfo>>,
    executed: Mutex<Vec<String>>,
}

impl MemorySchemaCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds an existing table.
    #[must_use]
    pub fn with_table(self, table: impl Into<String>, columns: Vec<ColumnInfo>) -> Self {
        self.tables.insert(table.into(), columns);
        self
    }

    /// Statements applied so far, in order.
    #[must_use]
    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().clone()
    }

    pub fn clear(&self) {
        self.tables.clear();
        self.executed.lock().clear();
    }
}

#[async_trait]
impl SchemaCatalog for MemorySchemaCatalog {
    async fn table_exists(&self, table: &str) -> anyhow::Result<bool> {
        Ok(self.tables.contains_key(table))
    }

    async fn columns(&self, table: &str) -> anyhow::Result<Vec<ColumnInfo>> {
        Ok(self
            .tables
            .get(table)
            .map(|cols| cols.clone())
            .unwrap_or_default())
    }

    async fn apply(&self, change: &SchemaChange) -> anyhow::Result<()> {
        let sql = change.to_sql()?;
        match change {
            SchemaChange::CreateTable { table, columns } => {
                self.tables.entry(table.clone()).or_insert_with(|| {
                    columns
                        .iter()
                        .map(|def| def.kind.to_column_info(&def.name))
                        .collect()
                });
            }
            SchemaChange::AddColumn { table, column } => {
                let Some(mut cols) = self.tables.get_mut(table) else {
                    anyhow::bail!("relation \"{table}\" does not exist");
                };
                if !cols.iter().any(|c| c.name == column.name) {
                    cols.push(column.kind.to_column_info(&column.name));
                }
            }
            SchemaChange::AlterColumnType {
                table, column, to, ..
            } => {
                let Some(mut cols) = self.tables.get_mut(table) else {
                    anyhow::bail!("relation \"{table}\" does not exist");
                };
                let Some(existing) = cols.iter_mut().find(|c| &c.name == column) else {
                    anyhow::bail!("column \"{column}\" of relation \"{table}\" does not exist");
                };
                *existing = to.to_column_info(column);
            }
        }
        self.executed.lock().push(sql);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use stencil_core::ColumnKind;

    use super::*;
    use crate::schema::ColumnDef;

    #[tokio::test]
    async fn add_column_to_missing_table_fails() {
        let catalog = MemorySchemaCatalog::new();
        let change = SchemaChange::AddColumn {
            table: "tasks".into(),
            column: ColumnDef {
                name: "title".into(),
                kind: ColumnKind::Text,
                nullable: true,
                primary_key: false,
                default: None,
            },
        };
        assert!(catalog.apply(&change).await.is_err());
        assert!(catalog.executed().is_empty());
    }

    #[tokio::test]
    async fn alter_rewrites_reported_type() {
        let catalog = MemorySchemaCatalog::new()
            .with_table("tasks", vec![ColumnKind::Varchar(50).to_column_info("title")]);
        catalog
            .apply(&SchemaChange::AlterColumnType {
                table: "tasks".into(),
                column: "title".into(),
                from: ColumnKind::Varchar(50),
                to: ColumnKind::Text,
            })
            .await
            .unwrap();
        let cols = catalog.columns("tasks").await.unwrap();
        assert_eq!(ColumnKind::from_column(&cols[0]), ColumnKind::Text);
    }
}
