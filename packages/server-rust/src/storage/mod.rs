//! Record storage for entity tables.
//!
//! - [`DataStore`](crate::traits::DataStore): backend trait, column-keyed rows
//! - [`TenantData`]: tenant-scoped handle handed to action handlers
//! - [`MemoryDataStore`]: `DashMap`-backed backend for tests and demos
//! - `PgDataStore` (feature `postgres`): `PostgreSQL` backend via `sqlx`

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod scoped;

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use memory::MemoryDataStore;
#[cfg(feature = "postgres")]
pub use postgres::PgDataStore;
pub use scoped::TenantData;

/// A stored row keyed by column name.
pub type Row = serde_json::Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    #[must_use]
    pub fn sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub column: String,
    pub direction: SortDirection,
}

/// Flat equality + sort + page query. Not a query planner.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindQuery {
    /// Column -> required value.
    pub filter: Row,
    pub order_by: Option<OrderBy>,
    pub limit: Option<u64>,
    pub offset: u64,
}

/// Total order over JSON scalars used for in-memory sorting.
///
/// Nulls sort last; numbers compare numerically; everything else compares
/// by its string form.
#[must_use]
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Greater,
        (_, Value::Null) => Ordering::Less,
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .unwrap_or_default()
            .total_cmp(&y.as_f64().unwrap_or_default()),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (x, y) => x.to_string().cmp(&y.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn nulls_sort_last_and_numbers_numerically() {
        let mut values = vec![json!(10), Value::Null, json!(2), json!(2.5)];
        values.sort_by(compare_values);
        assert_eq!(values, vec![json!(2), json!(2.5), json!(10), Value::Null]);
    }
}
