//! Table layout derived from an entity declaration.
//!
//! The layout is the contract between the schema engine (which creates and
//! alters tables from it) and the data-access layer (which translates
//! records between API names and column names through it).

use serde_json::{Map, Value};

use crate::column::ColumnKind;
use crate::entity::{EntityDeclaration, FieldType};
use crate::naming;

pub const ID_COLUMN: &str = "id";
pub const TENANT_COLUMN: &str = "tenant_id";
pub const CREATED_AT_COLUMN: &str = "created_at";
pub const UPDATED_AT_COLUMN: &str = "updated_at";

/// Where a column comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnSource {
    System,
    Field,
    ForeignKey,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSpec {
    /// Storage identifier (snake_case).
    pub name: String,
    /// Name the column travels under in action input and output.
    pub api_name: String,
    pub kind: ColumnKind,
    pub nullable: bool,
    pub default: Option<Value>,
    /// Logical type for field columns; `None` for system and FK columns.
    pub field_type: Option<FieldType>,
    pub source: ColumnSource,
}

impl ColumnSpec {
    fn system(name: &str, api_name: &str, kind: ColumnKind) -> Self {
        Self {
            name: name.to_string(),
            api_name: api_name.to_string(),
            kind,
            nullable: false,
            default: None,
            field_type: None,
            source: ColumnSource::System,
        }
    }

    #[must_use]
    pub fn is_primary_key(&self) -> bool {
        self.source == ColumnSource::System && self.name == ID_COLUMN
    }
}

/// Full column set of one entity table.
#[derive(Debug, Clone, PartialEq)]
pub struct TableLayout {
    pub entity: String,
    pub table: String,
    pub columns: Vec<ColumnSpec>,
}

impl TableLayout {
    /// System columns, then one column per field, then one nullable FK
    /// column per `belongsTo` relationship not already covered by a field.
    #[must_use]
    pub fn for_entity(entity: &EntityDeclaration) -> Self {
        let mut columns = vec![
            ColumnSpec::system(ID_COLUMN, "id", ColumnKind::Uuid),
            ColumnSpec::system(TENANT_COLUMN, "tenantId", ColumnKind::Text),
            ColumnSpec::system(CREATED_AT_COLUMN, "createdAt", ColumnKind::Timestamp),
            ColumnSpec::system(UPDATED_AT_COLUMN, "updatedAt", ColumnKind::Timestamp),
        ];

        for field in &entity.fields {
            columns.push(ColumnSpec {
                name: naming::column_name(&field.name),
                api_name: field.name.clone(),
                kind: ColumnKind::for_field(field.field_type),
                nullable: !field.required,
                default: field.default_value.clone(),
                field_type: Some(field.field_type),
                source: ColumnSource::Field,
            });
        }

        for rel in entity.belongs_to() {
            let name = naming::belongs_to_column(rel);
            let api_name = naming::belongs_to_api_name(rel);
            let covered = columns
                .iter()
                .any(|c| c.name == name || c.api_name == api_name);
            if covered {
                continue;
            }
            columns.push(ColumnSpec {
                name,
                api_name,
                kind: ColumnKind::Uuid,
                nullable: true,
                default: None,
                field_type: None,
                source: ColumnSource::ForeignKey,
            });
        }

        Self {
            entity: entity.name.clone(),
            table: entity.table_name(),
            columns,
        }
    }

    #[must_use]
    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }

    #[must_use]
    pub fn by_api_name(&self, api_name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.api_name == api_name)
    }

    /// Translates an API-keyed record into a column-keyed row. Keys with no
    /// column are dropped.
    #[must_use]
    pub fn to_row(&self, record: &Map<String, Value>) -> Map<String, Value> {
        record
            .iter()
            .filter_map(|(key, value)| {
                self.by_api_name(key)
                    .map(|col| (col.name.clone(), value.clone()))
            })
            .collect()
    }

    /// Translates a column-keyed row back into an API-keyed record.
    #[must_use]
    pub fn from_row(&self, row: &Map<String, Value>) -> Map<String, Value> {
        row.iter()
            .filter_map(|(key, value)| {
                self.column(key)
                    .map(|col| (col.api_name.clone(), value.clone()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::entity::{FieldDeclaration, RelationshipDeclaration};

    fn task() -> EntityDeclaration {
        EntityDeclaration::new("Task", "Tasks")
            .field(FieldDeclaration::new("title", FieldType::Text).required())
            .field(FieldDeclaration::new("dueDate", FieldType::Date))
            .relationship(RelationshipDeclaration::belongs_to("Project").with_foreign_key("project_id"))
            .relationship(RelationshipDeclaration::belongs_to("User").with_alias("assignee"))
    }

    #[test]
    fn layout_has_system_field_and_fk_columns() {
        let layout = TableLayout::for_entity(&task());
        let names: Vec<&str> = layout.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "id",
                "tenant_id",
                "created_at",
                "updated_at",
                "title",
                "due_date",
                "project_id",
                "assignee_id"
            ]
        );
        assert_eq!(layout.table, "tasks");
        let fk = layout.column("project_id").unwrap();
        assert_eq!(fk.api_name, "projectId");
        assert!(fk.nullable);
        assert!(!layout.column("title").unwrap().nullable);
    }

    #[test]
    fn fk_already_declared_as_field_is_not_duplicated() {
        let entity = task().field(FieldDeclaration::new("projectId", FieldType::Text));
        let layout = TableLayout::for_entity(&entity);
        assert_eq!(
            layout.columns.iter().filter(|c| c.name == "project_id").count(),
            1
        );
        assert_eq!(layout.column("project_id").unwrap().source, ColumnSource::Field);
    }

    #[test]
    fn translates_between_api_and_column_names() {
        let layout = TableLayout::for_entity(&task());
        let record = json!({"title": "Ship", "dueDate": "2024-01-01", "projectId": "p1", "junk": 1});
        let row = layout.to_row(record.as_object().unwrap());
        assert_eq!(row.get("due_date"), Some(&json!("2024-01-01")));
        assert_eq!(row.get("project_id"), Some(&json!("p1")));
        assert!(!row.contains_key("junk"));

        let back = layout.from_row(&row);
        assert_eq!(back.get("dueDate"), Some(&json!("2024-01-01")));
        assert_eq!(back.get("projectId"), Some(&json!("p1")));
    }
}
