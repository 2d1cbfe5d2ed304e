//! DDL intermediate representation and rendering.
//!
//! Identifiers are checked against the identifier rule when a statement is
//! rendered, and literal defaults can only be built through
//! [`SqlLiteral::render`], which type-checks the value and escapes quotes.

use serde_json::Value;
use stencil_core::layout::{ColumnSource, ColumnSpec, CREATED_AT_COLUMN, UPDATED_AT_COLUMN};
use stencil_core::naming::is_valid_identifier;
use stencil_core::{check_field_value, ColumnKind, FieldType};

#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("`{ident}` is not a valid identifier")]
    InvalidIdentifier { ident: String },
    #[error("default for `{column}` rejected: {reason}")]
    InvalidDefault { column: String, reason: String },
    #[error("schema catalog error: {0}")]
    Catalog(#[from] anyhow::Error),
}

fn ident(name: &str) -> Result<&str, SchemaError> {
    if is_valid_identifier(name) {
        Ok(name)
    } else {
        Err(SchemaError::InvalidIdentifier {
            ident: name.to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// Literals and defaults
// ---------------------------------------------------------------------------

/// A SQL literal that has been type-checked and escaped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlLiteral(String);

impl SqlLiteral {
    /// Renders `value` as a literal for a column of `field_type`.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::InvalidDefault`] when the value does not fit
    /// the field type or cannot be expressed as a literal.
    pub fn render(
        column: &str,
        field_type: FieldType,
        options: &[String],
        value: &Value,
    ) -> Result<Self, SchemaError> {
        let reject = |reason: String| SchemaError::InvalidDefault {
            column: column.to_string(),
            reason,
        };
        check_field_value(field_type, options, value).map_err(|issue| reject(issue.message))?;
        match value {
            Value::Bool(true) => Ok(Self("TRUE".to_string())),
            Value::Bool(false) => Ok(Self("FALSE".to_string())),
            Value::Number(n) => Ok(Self(n.to_string())),
            Value::String(s) => Ok(Self(format!("'{}'", s.replace('\'', "''")))),
            other => Err(reject(format!("cannot express {other} as a literal"))),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnDefault {
    Literal(SqlLiteral),
    Now,
    RandomUuid,
}

impl ColumnDefault {
    fn sql(&self) -> &str {
        match self {
            Self::Literal(lit) => lit.as_str(),
            Self::Now => "NOW()",
            Self::RandomUuid => "gen_random_uuid()",
        }
    }
}

// ---------------------------------------------------------------------------
// ColumnDef
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    pub kind: ColumnKind,
    pub nullable: bool,
    pub primary_key: bool,
    pub default: Option<ColumnDefault>,
}

impl ColumnDef {
    /// Column definition for a layout column.
    ///
    /// A default that fails to render is dropped and its error returned
    /// alongside, so the column itself can still be created.
    #[must_use]
    pub fn from_spec(spec: &ColumnSpec, options: &[String]) -> (Self, Option<SchemaError>) {
        let mut rejected = None;
        let default = match spec.source {
            ColumnSource::System if spec.is_primary_key() => Some(ColumnDefault::RandomUuid),
            ColumnSource::System
                if spec.name == CREATED_AT_COLUMN || spec.name == UPDATED_AT_COLUMN =>
            {
                Some(ColumnDefault::Now)
            }
            _ => match (&spec.default, spec.field_type) {
                (Some(value), Some(field_type)) if !value.is_null() => {
                    match SqlLiteral::render(&spec.name, field_type, options, value) {
                        Ok(lit) => Some(ColumnDefault::Literal(lit)),
                        Err(err) => {
                            rejected = Some(err);
                            None
                        }
                    }
                }
                _ => None,
            },
        };
        let def = Self {
            name: spec.name.clone(),
            kind: spec.kind.clone(),
            nullable: spec.nullable,
            primary_key: spec.is_primary_key(),
            default,
        };
        (def, rejected)
    }

    /// # Errors
    ///
    /// Returns [`SchemaError::InvalidIdentifier`] for a bad column name.
    pub fn to_sql(&self) -> Result<String, SchemaError> {
        let mut sql = format!("{} {}", ident(&self.name)?, self.kind.sql());
        if self.primary_key {
            sql.push_str(" PRIMARY KEY");
        } else if !self.nullable {
            sql.push_str(" NOT NULL");
        }
        if let Some(default) = &self.default {
            sql.push_str(" DEFAULT ");
            sql.push_str(default.sql());
        }
        Ok(sql)
    }
}

// ---------------------------------------------------------------------------
// SchemaChange
// ---------------------------------------------------------------------------

/// One additive change to the live schema. There is deliberately no drop
/// variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaChange {
    CreateTable {
        table: String,
        columns: Vec<ColumnDef>,
    },
    AddColumn {
        table: String,
        column: ColumnDef,
    },
    AlterColumnType {
        table: String,
        column: String,
        from: ColumnKind,
        to: ColumnKind,
    },
}

impl SchemaChange {
    #[must_use]
    pub fn table(&self) -> &str {
        match self {
            Self::CreateTable { table, .. }
            | Self::AddColumn { table, .. }
            | Self::AlterColumnType { table, .. } => table,
        }
    }

    /// # Errors
    ///
    /// Returns [`SchemaError::InvalidIdentifier`] if any table or column
    /// name fails the identifier rule.
    pub fn to_sql(&self) -> Result<String, SchemaError> {
        match self {
            Self::CreateTable { table, columns } => {
                let defs = columns
                    .iter()
                    .map(ColumnDef::to_sql)
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(format!(
                    "CREATE TABLE IF NOT EXISTS {} (\n  {}\n)",
                    ident(table)?,
                    defs.join(",\n  ")
                ))
            }
            Self::AddColumn { table, column } => Ok(format!(
                "ALTER TABLE {} ADD COLUMN IF NOT EXISTS {}",
                ident(table)?,
                column.to_sql()?
            )),
            Self::AlterColumnType {
                table, column, to, ..
            } => {
                let column = ident(column)?;
                let ty = to.sql();
                Ok(format!(
                    "ALTER TABLE {} ALTER COLUMN {column} TYPE {ty} USING {column}::{ty}",
                    ident(table)?
                ))
            }
        }
    }
}
