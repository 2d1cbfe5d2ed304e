//! Physical column kinds: the closed intermediate representation both the
//! table builder and the migration differ read from.
//!
//! A logical [`FieldType`] maps to exactly one [`ColumnKind`]; live columns
//! reported by a catalog are normalized into the same enum before they are
//! compared, so there is one vocabulary for "what type is this column".

use serde::{Deserialize, Serialize};

use crate::entity::FieldType;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnKind {
    Uuid,
    /// Unbounded text.
    Text,
    /// Bounded text with a maximum length.
    Varchar(u32),
    Numeric,
    Boolean,
    Date,
    /// Timestamp with time zone.
    Timestamp,
    /// Anything a catalog reports that the engine does not model.
    Other(String),
}

impl ColumnKind {
    /// Physical kind backing a logical field type.
    #[must_use]
    pub fn for_field(field_type: FieldType) -> Self {
        match field_type {
            FieldType::Text | FieldType::Email => Self::Varchar(255),
            FieldType::Phone => Self::Varchar(50),
            FieldType::Enum => Self::Varchar(100),
            FieldType::Url | FieldType::RichText => Self::Text,
            FieldType::Currency | FieldType::Number | FieldType::Percentage => Self::Numeric,
            FieldType::Boolean => Self::Boolean,
            FieldType::Date => Self::Date,
            FieldType::Datetime => Self::Timestamp,
        }
    }

    /// Type clause used in generated DDL.
    #[must_use]
    pub fn sql(&self) -> String {
        match self {
            Self::Uuid => "UUID".to_string(),
            Self::Text => "TEXT".to_string(),
            Self::Varchar(n) => format!("VARCHAR({n})"),
            Self::Numeric => "NUMERIC".to_string(),
            Self::Boolean => "BOOLEAN".to_string(),
            Self::Date => "DATE".to_string(),
            Self::Timestamp => "TIMESTAMPTZ".to_string(),
            Self::Other(raw) => raw.to_uppercase(),
        }
    }

    /// Parses a SQL type clause such as `VARCHAR(255)` or `timestamp with time zone`.
    #[must_use]
    pub fn parse_sql(raw: &str) -> Self {
        let normalized = raw.trim().to_ascii_lowercase();
        let (base, arg) = match normalized.split_once('(') {
            Some((base, rest)) => (base.trim(), rest.trim_end_matches(')').trim()),
            None => (normalized.as_str(), ""),
        };
        match base {
            "uuid" => Self::Uuid,
            "text" => Self::Text,
            "varchar" | "character varying" => match arg.parse::<u32>() {
                Ok(n) => Self::Varchar(n),
                Err(_) => Self::Text,
            },
            "numeric" | "decimal" | "integer" | "int" | "int4" | "int8" | "bigint" | "smallint"
            | "real" | "double precision" | "float8" => Self::Numeric,
            "boolean" | "bool" => Self::Boolean,
            "date" => Self::Date,
            "timestamptz" | "timestamp" | "timestamp with time zone"
            | "timestamp without time zone" => Self::Timestamp,
            _ => Self::Other(normalized),
        }
    }

    /// Normalizes a live column description into a kind.
    #[must_use]
    pub fn from_column(info: &ColumnInfo) -> Self {
        match (Self::parse_sql(&info.data_type), info.max_length) {
            (Self::Text, Some(n)) if info.data_type.eq_ignore_ascii_case("character varying") => {
                Self::Varchar(n)
            }
            (kind, _) => kind,
        }
    }

    /// The description a catalog reports for a column of this kind.
    #[must_use]
    pub fn to_column_info(&self, name: &str) -> ColumnInfo {
        let (data_type, max_length) = match self {
            Self::Uuid => ("uuid".to_string(), None),
            Self::Text => ("text".to_string(), None),
            Self::Varchar(n) => ("character varying".to_string(), Some(*n)),
            Self::Numeric => ("numeric".to_string(), None),
            Self::Boolean => ("boolean".to_string(), None),
            Self::Date => ("date".to_string(), None),
            Self::Timestamp => ("timestamp with time zone".to_string(), None),
            Self::Other(raw) => (raw.clone(), None),
        };
        ColumnInfo {
            name: name.to_string(),
            data_type,
            max_length,
        }
    }

    #[must_use]
    pub fn is_temporal(&self) -> bool {
        matches!(self, Self::Date | Self::Timestamp)
    }
}

/// A column as reported by the live schema. Read fresh on every pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
    pub max_length: Option<u32>,
}
