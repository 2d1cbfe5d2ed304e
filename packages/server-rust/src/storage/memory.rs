//! In-memory [`DataStore`] implementation backed by [`DashMap`].
//!
//! One shard per table; rows keep insertion order so unsorted listings are
//! stable. Suitable for tests, demos, and the `--database-url`-less CLI.

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use stencil_core::layout::{ID_COLUMN, TENANT_COLUMN};

use super::{compare_values, FindQuery, Row, SortDirection};
use crate::traits::DataStore;

pub struct MemoryDataStore {
    tables: DashMap<String, Vec<Row>>,
}

impl MemoryDataStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            tables: DashMap::new(),
        }
    }

    /// Drops every row of every table.
    pub fn clear(&self) {
        self.tables.clear();
    }
}

impl Default for MemoryDataStore {
    fn default() -> Self {
        Self::new()
    }
}

fn belongs_to(row: &Row, tenant: &str) -> bool {
    row.get(TENANT_COLUMN).and_then(Value::as_str) == Some(tenant)
}

fn has_id(row: &Row, id: &str) -> bool {
    row.get(ID_COLUMN).and_then(Value::as_str) == Some(id)
}

fn matches(row: &Row, filter: &Row) -> bool {
    filter
        .iter()
        .all(|(column, expected)| row.get(column).unwrap_or(&Value::Null) == expected)
}

#[async_trait]
impl DataStore for MemoryDataStore {
    async fn find_many(
        &self,
        tenant: &str,
        table: &str,
        query: &FindQuery,
    ) -> anyhow::Result<Vec<Row>> {
        let Some(rows) = self.tables.get(table) else {
            return Ok(Vec::new());
        };
        let mut found: Vec<Row> = rows
            .iter()
            .filter(|row| belongs_to(row, tenant) && matches(row, &query.filter))
            .cloned()
            .collect();
        drop(rows);

        if let Some(order) = &query.order_by {
            found.sort_by(|a, b| {
                let ord = compare_values(
                    a.get(&order.column).unwrap_or(&Value::Null),
                    b.get(&order.column).unwrap_or(&Value::Null),
                );
                match order.direction {
                    SortDirection::Asc => ord,
                    SortDirection::Desc => ord.reverse(),
                }
            });
        }

        let offset = usize::try_from(query.offset).unwrap_or(usize::MAX);
        let limit = query
            .limit
            .map_or(usize::MAX, |l| usize::try_from(l).unwrap_or(usize::MAX));
        Ok(found.into_iter().skip(offset).take(limit).collect())
    }

    async fn find_by_id(&self, tenant: &str, table: &str, id: &str) -> anyhow::Result<Option<Row>> {
        Ok(self.tables.get(table).and_then(|rows| {
            rows.iter()
                .find(|row| belongs_to(row, tenant) && has_id(row, id))
                .cloned()
        }))
    }

    async fn create(&self, tenant: &str, table: &str, mut row: Row) -> anyhow::Result<Row> {
        row.insert(TENANT_COLUMN.to_string(), Value::String(tenant.to_string()));
        let id = match row.get(ID_COLUMN).and_then(Value::as_str) {
            Some(id) => id.to_string(),
            None => {
                let id = uuid::Uuid::new_v4().to_string();
                row.insert(ID_COLUMN.to_string(), Value::String(id.clone()));
                id
            }
        };

        let mut rows = self.tables.entry(table.to_string()).or_default();
        if rows.iter().any(|r| has_id(r, &id)) {
            anyhow::bail!("duplicate key `{id}` in table `{table}`");
        }
        rows.push(row.clone());
        Ok(row)
    }

    async fn update(
        &self,
        tenant: &str,
        table: &str,
        id: &str,
        changes: Row,
    ) -> anyhow::Result<Option<Row>> {
        let Some(mut rows) = self.tables.get_mut(table) else {
            return Ok(None);
        };
        let Some(row) = rows
            .iter_mut()
            .find(|row| belongs_to(row, tenant) && has_id(row, id))
        else {
            return Ok(None);
        };
        for (column, value) in changes {
            row.insert(column, value);
        }
        Ok(Some(row.clone()))
    }

    async fn delete(&self, tenant: &str, table: &str, id: &str) -> anyhow::Result<bool> {
        let Some(mut rows) = self.tables.get_mut(table) else {
            return Ok(false);
        };
        let before = rows.len();
        rows.retain(|row| !(belongs_to(row, tenant) && has_id(row, id)));
        Ok(rows.len() != before)
    }

    async fn count(&self, tenant: &str, table: &str, filter: &Row) -> anyhow::Result<u64> {
        let Some(rows) = self.tables.get(table) else {
            return Ok(0);
        };
        let n = rows
            .iter()
            .filter(|row| belongs_to(row, tenant) && matches(row, filter))
            .count();
        Ok(u64::try_from(n).unwrap_or(u64::MAX))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::storage::OrderBy;

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap_or_default()
    }

    async fn seeded() -> MemoryDataStore {
        let store = MemoryDataStore::new();
        for (id, title, priority) in [("a", "alpha", 3), ("b", "bravo", 1), ("c", "charlie", 2)] {
            store
                .create(
                    "t1",
                    "tasks",
                    row(json!({"id": id, "title": title, "priority": priority, "done": false})),
                )
                .await
                .unwrap();
        }
        store
            .create("t2", "tasks", row(json!({"id": "z", "title": "other"})))
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn create_assigns_id_when_missing() {
        let store = MemoryDataStore::new();
        let created = store
            .create("t1", "tasks", row(json!({"title": "x"})))
            .await
            .unwrap();
        let id = created.get("id").and_then(Value::as_str).unwrap();
        assert!(uuid::Uuid::parse_str(id).is_ok());
    }

    #[tokio::test]
    async fn duplicate_id_is_rejected() {
        let store = seeded().await;
        assert!(store
            .create("t1", "tasks", row(json!({"id": "a"})))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn find_many_sorts_and_pages() {
        let store = seeded().await;
        let query = FindQuery {
            order_by: Some(OrderBy {
                column: "priority".into(),
                direction: SortDirection::Desc,
            }),
            limit: Some(2),
            offset: 1,
            ..FindQuery::default()
        };
        let rows = store.find_many("t1", "tasks", &query).await.unwrap();
        let ids: Vec<_> = rows.iter().map(|r| r["id"].clone()).collect();
        assert_eq!(ids, vec![json!("c"), json!("b")]);
    }

    #[tokio::test]
    async fn filter_is_column_equality() {
        let store = seeded().await;
        let query = FindQuery {
            filter: row(json!({"title": "bravo"})),
            ..FindQuery::default()
        };
        let rows = store.find_many("t1", "tasks", &query).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(
            store.count("t1", "tasks", &row(json!({"done": false}))).await.unwrap(),
            3
        );
        assert_eq!(store.count("t2", "tasks", &Row::new()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn update_and_delete() {
        let store = seeded().await;
        let updated = store
            .update("t1", "tasks", "a", row(json!({"done": true})))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated["done"], json!(true));
        assert_eq!(updated["title"], json!("alpha"));

        assert!(store.delete("t1", "tasks", "a").await.unwrap());
        assert!(!store.delete("t1", "tasks", "a").await.unwrap());
        assert!(store.find_by_id("t1", "tasks", "a").await.unwrap().is_none());
        assert!(store.update("t1", "missing", "a", Row::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn clear_empties_all_tables() {
        let store = seeded().await;
        store.clear();
        assert_eq!(store.count("t1", "tasks", &Row::new()).await.unwrap(), 0);
    }
}
