//! Naming rules shared by the action compiler and the schema engine.
//!
//! Two namespaces exist side by side: API field names (camelCase, what
//! callers send) and storage identifiers (snake_case, what the tables use).
//! Every translation between them goes through this module.

use std::sync::LazyLock;

use convert_case::{Case, Casing};
use regex::Regex;

use crate::entity::RelationshipDeclaration;

/// Maximum identifier length accepted by the storage layer.
pub const MAX_IDENTIFIER_LEN: usize = 63;

static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z_][a-z0-9_]*$").expect("static identifier pattern"));

/// Table name for an entity: the plural name in snake_case.
#[must_use]
pub fn table_name(plural_name: &str) -> String {
    plural_name.to_case(Case::Snake)
}

/// Storage column for a declared field.
#[must_use]
pub fn column_name(field_name: &str) -> String {
    field_name.to_case(Case::Snake)
}

/// API-facing input name for a `belongsTo` relationship.
///
/// Always derived from `(as ?? entity) + "Id"`; `foreignKey` never
/// participates because it names a storage column.
#[must_use]
pub fn belongs_to_api_name(rel: &RelationshipDeclaration) -> String {
    format!("{}Id", rel.target_alias()).to_case(Case::Camel)
}

/// Storage column for a `belongsTo` relationship.
#[must_use]
pub fn belongs_to_column(rel: &RelationshipDeclaration) -> String {
    match &rel.foreign_key {
        Some(fk) => fk.clone(),
        None => format!("{}_id", rel.target_alias().to_case(Case::Snake)),
    }
}

/// Returns `true` when `ident` is safe to splice into a generated statement.
#[must_use]
pub fn is_valid_identifier(ident: &str) -> bool {
    ident.len() <= MAX_IDENTIFIER_LEN && IDENTIFIER.is_match(ident)
}

/// Lowercase dotted prefix used for action ids (`"ProjectTask"` -> `"project_task"`).
#[must_use]
pub fn action_prefix(entity_name: &str) -> String {
    entity_name.to_case(Case::Snake)
}
