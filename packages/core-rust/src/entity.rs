//! Entity declarations: the author-supplied description every action and
//! table is derived from.
//!
//! Declarations are plain data. They deserialize from JSON with camelCase
//! keys and are immutable once loaded.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::layout::{CREATED_AT_COLUMN, ID_COLUMN, TENANT_COLUMN, UPDATED_AT_COLUMN};
use crate::naming;
use crate::permission::PermissionRule;
use crate::shape::check_field_value;

// ---------------------------------------------------------------------------
// Fields
// ---------------------------------------------------------------------------

/// Closed set of logical field types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Text,
    Email,
    Phone,
    Url,
    Currency,
    Date,
    Datetime,
    Number,
    Percentage,
    Enum,
    RichText,
    Boolean,
}

impl FieldType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Email => "email",
            Self::Phone => "phone",
            Self::Url => "url",
            Self::Currency => "currency",
            Self::Date => "date",
            Self::Datetime => "datetime",
            Self::Number => "number",
            Self::Percentage => "percentage",
            Self::Enum => "enum",
            Self::RichText => "rich_text",
            Self::Boolean => "boolean",
        }
    }

    /// Types whose values travel as JSON strings.
    #[must_use]
    pub fn is_textual(self) -> bool {
        matches!(
            self,
            Self::Text
                | Self::Email
                | Self::Phone
                | Self::Url
                | Self::RichText
                | Self::Enum
                | Self::Date
                | Self::Datetime
        )
    }

    #[must_use]
    pub fn is_numeric(self) -> bool {
        matches!(self, Self::Currency | Self::Number | Self::Percentage)
    }
}

/// One declared field of an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDeclaration {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
    /// Allowed values for `enum` fields. Empty means free text.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

impl FieldDeclaration {
    #[must_use]
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: false,
            default_value: None,
            options: Vec::new(),
        }
    }

    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    #[must_use]
    pub fn with_default(mut self, value: Value) -> Self {
        self.default_value = Some(value);
        self
    }

    #[must_use]
    pub fn with_options<I, S>(mut self, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options = options.into_iter().map(Into::into).collect();
        self
    }
}

// ---------------------------------------------------------------------------
// Relationships
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RelationKind {
    BelongsTo,
    HasMany,
    ManyToMany,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationshipDeclaration {
    #[serde(rename = "type")]
    pub kind: RelationKind,
    /// Target entity name.
    pub entity: String,
    /// Storage column name. Never used for the API field name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub foreign_key: Option<String>,
    #[serde(rename = "as", default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

impl RelationshipDeclaration {
    #[must_use]
    pub fn belongs_to(entity: impl Into<String>) -> Self {
        Self {
            kind: RelationKind::BelongsTo,
            entity: entity.into(),
            foreign_key: None,
            alias: None,
        }
    }

    #[must_use]
    pub fn with_foreign_key(mut self, column: impl Into<String>) -> Self {
        self.foreign_key = Some(column.into());
        self
    }

    #[must_use]
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// `as` when present, otherwise the target entity name.
    #[must_use]
    pub fn target_alias(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.entity)
    }

    #[must_use]
    pub fn is_belongs_to(&self) -> bool {
        self.kind == RelationKind::BelongsTo
    }
}

// ---------------------------------------------------------------------------
// Workflows
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transition {
    pub from: String,
    pub to: String,
    /// Fields that must be non-empty before the transition commits.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requires: Vec<String>,
    /// Event names announced when the transition commits.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub triggers: Vec<String>,
}

impl Transition {
    #[must_use]
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            requires: Vec::new(),
            triggers: Vec::new(),
        }
    }

    #[must_use]
    pub fn requires(mut self, field: impl Into<String>) -> Self {
        self.requires.push(field.into());
        self
    }

    #[must_use]
    pub fn triggers(mut self, event: impl Into<String>) -> Self {
        self.triggers.push(event.into());
        self
    }
}

/// Linear state machine over one field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDeclaration {
    pub field: String,
    pub transitions: Vec<Transition>,
}

impl WorkflowDeclaration {
    #[must_use]
    pub fn new(field: impl Into<String>, transitions: Vec<Transition>) -> Self {
        Self {
            field: field.into(),
            transitions,
        }
    }

    /// Destinations reachable from `state`, in declaration order. Empty for
    /// terminal states.
    #[must_use]
    pub fn targets_from(&self, state: &str) -> Vec<String> {
        let mut targets: Vec<String> = Vec::new();
        for t in self.transitions.iter().filter(|t| t.from == state) {
            if !targets.contains(&t.to) {
                targets.push(t.to.clone());
            }
        }
        targets
    }

    #[must_use]
    pub fn find(&self, from: &str, to: &str) -> Option<&Transition> {
        self.transitions.iter().find(|t| t.from == from && t.to == to)
    }

    /// A state is a legal entry state when some transition leaves it.
    #[must_use]
    pub fn is_entry_state(&self, state: &str) -> bool {
        self.transitions.iter().any(|t| t.from == state)
    }

    #[must_use]
    pub fn entry_states(&self) -> Vec<String> {
        let mut states: Vec<String> = Vec::new();
        for t in &self.transitions {
            if !states.contains(&t.from) {
                states.push(t.from.clone());
            }
        }
        states
    }
}

// ---------------------------------------------------------------------------
// Verbs and side effects
// ---------------------------------------------------------------------------

/// The five standard actions compiled for every entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verb {
    Create,
    List,
    Get,
    Update,
    Delete,
}

impl Verb {
    pub const ALL: [Verb; 5] = [Verb::Create, Verb::List, Verb::Get, Verb::Update, Verb::Delete];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::List => "list",
            Self::Get => "get",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }

    #[must_use]
    pub fn is_read(self) -> bool {
        matches!(self, Self::List | Self::Get)
    }
}

/// Work declared to run after an action succeeds. Failures never reach the
/// caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SideEffect {
    /// Publish an event with the action result as payload.
    Emit { event: String },
    /// Record a notification in the log.
    Notify { message: String },
    /// POST the action result as JSON to `url`.
    Webhook { url: String },
}

// ---------------------------------------------------------------------------
// EntityDeclaration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityDeclaration {
    /// PascalCase singular name (e.g. `"Task"`).
    pub name: String,
    pub plural_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub fields: Vec<FieldDeclaration>,
    #[serde(default)]
    pub relationships: Vec<RelationshipDeclaration>,
    #[serde(default)]
    pub workflows: Vec<WorkflowDeclaration>,
    /// Per-verb permission overrides. Verbs without an entry get defaults.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub permissions: BTreeMap<Verb, Vec<PermissionRule>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub side_effects: BTreeMap<Verb, Vec<SideEffect>>,
    /// Presentation hints. Carried along, never interpreted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ui: Option<Value>,
}

impl EntityDeclaration {
    #[must_use]
    pub fn new(name: impl Into<String>, plural_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            plural_name: plural_name.into(),
            description: None,
            fields: Vec::new(),
            relationships: Vec::new(),
            workflows: Vec::new(),
            permissions: BTreeMap::new(),
            side_effects: BTreeMap::new(),
            ui: None,
        }
    }

    #[must_use]
    pub fn field(mut self, field: FieldDeclaration) -> Self {
        self.fields.push(field);
        self
    }

    #[must_use]
    pub fn relationship(mut self, rel: RelationshipDeclaration) -> Self {
        self.relationships.push(rel);
        self
    }

    #[must_use]
    pub fn workflow(mut self, workflow: WorkflowDeclaration) -> Self {
        self.workflows.push(workflow);
        self
    }

    #[must_use]
    pub fn permission(mut self, verb: Verb, rules: Vec<PermissionRule>) -> Self {
        self.permissions.insert(verb, rules);
        self
    }

    #[must_use]
    pub fn side_effect(mut self, verb: Verb, effect: SideEffect) -> Self {
        self.side_effects.entry(verb).or_default().push(effect);
        self
    }

    #[must_use]
    pub fn find_field(&self, name: &str) -> Option<&FieldDeclaration> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn belongs_to(&self) -> impl Iterator<Item = &RelationshipDeclaration> {
        self.relationships.iter().filter(|r| r.is_belongs_to())
    }

    #[must_use]
    pub fn table_name(&self) -> String {
        naming::table_name(&self.plural_name)
    }

    /// Every name a caller may send in a create/update payload.
    #[must_use]
    pub fn input_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.fields.iter().map(|f| f.name.clone()).collect();
        for rel in self.belongs_to() {
            let api = naming::belongs_to_api_name(rel);
            if !names.contains(&api) {
                names.push(api);
            }
        }
        names
    }

    /// Checks the structural invariants of the declaration.
    ///
    /// # Errors
    ///
    /// Returns the first violated invariant as a [`DeclarationError`].
    pub fn validate(&self) -> Result<(), DeclarationError> {
        let starts_upper = self.name.chars().next().is_some_and(|c| c.is_ascii_uppercase());
        if !starts_upper || !self.name.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(DeclarationError::InvalidName {
                name: self.name.clone(),
            });
        }
        if self.plural_name.trim().is_empty() {
            return Err(DeclarationError::MissingPluralName {
                entity: self.name.clone(),
            });
        }

        let table = self.table_name();
        if !naming::is_valid_identifier(&table) {
            return Err(DeclarationError::InvalidIdentifier {
                entity: self.name.clone(),
                identifier: table,
            });
        }

        let mut seen = HashSet::new();
        let mut columns: HashMap<String, &str> = HashMap::new();
        for field in &self.fields {
            if !seen.insert(field.name.as_str()) {
                return Err(DeclarationError::DuplicateField {
                    entity: self.name.clone(),
                    field: field.name.clone(),
                });
            }
            let column = self.checked_column(&field.name, naming::column_name(&field.name))?;
            if let Some(first) = columns.insert(column.clone(), field.name.as_str()) {
                return Err(DeclarationError::ColumnCollision {
                    entity: self.name.clone(),
                    first: first.to_string(),
                    second: field.name.clone(),
                    column,
                });
            }
            if let Some(default) = &field.default_value {
                if let Err(issue) = check_field_value(field.field_type, &field.options, default) {
                    return Err(DeclarationError::InvalidDefault {
                        entity: self.name.clone(),
                        field: field.name.clone(),
                        reason: issue.message,
                    });
                }
            }
        }

        for rel in self.belongs_to() {
            let api_name = naming::belongs_to_api_name(rel);
            self.checked_column(&api_name, naming::column_name(&api_name))?;
            self.checked_column(&api_name, naming::belongs_to_column(rel))?;
        }

        let inputs = self.input_names();
        for workflow in &self.workflows {
            let Some(field) = self.find_field(&workflow.field) else {
                return Err(DeclarationError::UnknownWorkflowField {
                    entity: self.name.clone(),
                    field: workflow.field.clone(),
                });
            };
            if !matches!(field.field_type, FieldType::Enum | FieldType::Text) {
                return Err(DeclarationError::WorkflowFieldType {
                    entity: self.name.clone(),
                    field: field.name.clone(),
                    field_type: field.field_type.as_str(),
                });
            }
            if let Some(default) = &field.default_value {
                if !default.as_str().is_some_and(|state| workflow.is_entry_state(state)) {
                    return Err(DeclarationError::InvalidWorkflowDefault {
                        entity: self.name.clone(),
                        field: field.name.clone(),
                        value: default.clone(),
                        entry_states: workflow.entry_states(),
                    });
                }
            }
            for transition in &workflow.transitions {
                if let Some(missing) = transition.requires.iter().find(|r| !inputs.contains(r)) {
                    return Err(DeclarationError::UnknownRequiredField {
                        entity: self.name.clone(),
                        field: missing.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Rejects a storage column that is not a safe identifier or that
    /// shadows one of the system columns every table carries.
    fn checked_column(&self, field: &str, column: String) -> Result<String, DeclarationError> {
        if !naming::is_valid_identifier(&column) {
            return Err(DeclarationError::InvalidIdentifier {
                entity: self.name.clone(),
                identifier: column,
            });
        }
        if SYSTEM_COLUMNS.contains(&column.as_str()) {
            return Err(DeclarationError::ReservedColumn {
                entity: self.name.clone(),
                field: field.to_string(),
                column,
            });
        }
        Ok(column)
    }
}

const SYSTEM_COLUMNS: [&str; 4] = [ID_COLUMN, TENANT_COLUMN, CREATED_AT_COLUMN, UPDATED_AT_COLUMN];

/// A declaration that cannot be compiled.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeclarationError {
    #[error("entity name `{name}` must be PascalCase")]
    InvalidName { name: String },
    #[error("entity `{entity}` has no plural name")]
    MissingPluralName { entity: String },
    #[error("entity `{entity}` declares field `{field}` more than once")]
    DuplicateField { entity: String, field: String },
    #[error("entity `{entity}` field `{field}` has an invalid default: {reason}")]
    InvalidDefault {
        entity: String,
        field: String,
        reason: String,
    },
    #[error("entity `{entity}` declares a workflow on unknown field `{field}`")]
    UnknownWorkflowField { entity: String, field: String },
    #[error("entity `{entity}` workflow field `{field}` has type `{field_type}`, expected enum or text")]
    WorkflowFieldType {
        entity: String,
        field: String,
        field_type: &'static str,
    },
    #[error("entity `{entity}` workflow requires unknown field `{field}`")]
    UnknownRequiredField { entity: String, field: String },
    #[error("entity `{entity}` derives `{identifier}`, which is not a valid SQL identifier")]
    InvalidIdentifier { entity: String, identifier: String },
    #[error("entity `{entity}` field `{field}` maps to reserved column `{column}`")]
    ReservedColumn {
        entity: String,
        field: String,
        column: String,
    },
    #[error("entity `{entity}` fields `{first}` and `{second}` both map to column `{column}`")]
    ColumnCollision {
        entity: String,
        first: String,
        second: String,
        column: String,
    },
    #[error(
        "entity `{entity}` workflow field `{field}` defaults to {value}, \
         which is not an entry state (expected one of {entry_states:?})"
    )]
    InvalidWorkflowDefault {
        entity: String,
        field: String,
        value: Value,
        entry_states: Vec<String>,
    },
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn task() -> EntityDeclaration {
        EntityDeclaration::new("Task", "Tasks")
            .field(FieldDeclaration::new("title", FieldType::Text).required())
            .field(
                FieldDeclaration::new("status", FieldType::Enum)
                    .required()
                    .with_default(json!("todo"))
                    .with_options(["todo", "in_progress", "done"]),
            )
            .relationship(RelationshipDeclaration::belongs_to("Contact"))
            .workflow(WorkflowDeclaration::new(
                "status",
                vec![
                    Transition::new("todo", "in_progress"),
                    Transition::new("in_progress", "done").requires("contactId"),
                ],
            ))
    }

    #[test]
    fn valid_declaration_passes() {
        assert_eq!(task().validate(), Ok(()));
    }

    #[test]
    fn duplicate_field_rejected() {
        let entity = task().field(FieldDeclaration::new("title", FieldType::Text));
        assert!(matches!(
            entity.validate(),
            Err(DeclarationError::DuplicateField { field, .. }) if field == "title"
        ));
    }

    #[test]
    fn workflow_on_missing_field_rejected() {
        let entity = task().workflow(WorkflowDeclaration::new("stage", vec![]));
        assert!(matches!(
            entity.validate(),
            Err(DeclarationError::UnknownWorkflowField { field, .. }) if field == "stage"
        ));
    }

    #[test]
    fn default_must_match_field_type() {
        let entity = EntityDeclaration::new("Deal", "Deals").field(
            FieldDeclaration::new("amount", FieldType::Currency).with_default(json!("lots")),
        );
        assert!(matches!(
            entity.validate(),
            Err(DeclarationError::InvalidDefault { field, .. }) if field == "amount"
        ));
    }

    #[test]
    fn lowercase_entity_name_rejected() {
        let entity = EntityDeclaration::new("task", "tasks");
        assert!(matches!(entity.validate(), Err(DeclarationError::InvalidName { .. })));
    }

    #[test]
    fn fields_sharing_a_column_rejected() {
        let entity = task()
            .field(FieldDeclaration::new("dueDate", FieldType::Date))
            .field(FieldDeclaration::new("due_date", FieldType::Date));
        assert_eq!(
            entity.validate(),
            Err(DeclarationError::ColumnCollision {
                entity: "Task".into(),
                first: "dueDate".into(),
                second: "due_date".into(),
                column: "due_date".into(),
            })
        );
    }

    #[test]
    fn fields_shadowing_system_columns_rejected() {
        for (name, column) in [
            ("id", "id"),
            ("tenantId", "tenant_id"),
            ("createdAt", "created_at"),
            ("updated_at", "updated_at"),
        ] {
            let entity = task().field(FieldDeclaration::new(name, FieldType::Text));
            assert!(
                matches!(
                    entity.validate(),
                    Err(DeclarationError::ReservedColumn { field, column: c, .. })
                        if field == name && c == column
                ),
                "{name}"
            );
        }
    }

    #[test]
    fn relationship_shadowing_tenant_column_rejected() {
        let entity = task().relationship(RelationshipDeclaration::belongs_to("Tenant"));
        assert!(matches!(
            entity.validate(),
            Err(DeclarationError::ReservedColumn { column, .. }) if column == "tenant_id"
        ));
    }

    #[test]
    fn unsafe_identifiers_rejected() {
        let entity = EntityDeclaration::new("Task", "Tâches");
        assert!(matches!(
            entity.validate(),
            Err(DeclarationError::InvalidIdentifier { .. })
        ));

        let entity = task().field(FieldDeclaration::new("größe", FieldType::Number));
        assert!(matches!(
            entity.validate(),
            Err(DeclarationError::InvalidIdentifier { .. })
        ));

        let entity = task().relationship(
            RelationshipDeclaration::belongs_to("Project").with_foreign_key("project id"),
        );
        assert!(matches!(
            entity.validate(),
            Err(DeclarationError::InvalidIdentifier { identifier, .. }) if identifier == "project id"
        ));
    }

    #[test]
    fn workflow_default_must_be_an_entry_state() {
        let mut entity = task();
        entity.fields[1].default_value = Some(json!("done"));
        assert_eq!(
            entity.validate(),
            Err(DeclarationError::InvalidWorkflowDefault {
                entity: "Task".into(),
                field: "status".into(),
                value: json!("done"),
                entry_states: vec!["todo".into(), "in_progress".into()],
            })
        );

        entity.fields[1].default_value = Some(json!("in_progress"));
        assert_eq!(entity.validate(), Ok(()));
    }

    #[test]
    fn targets_and_entry_states() {
        let entity = task();
        let wf = &entity.workflows[0];
        assert_eq!(wf.targets_from("todo"), vec!["in_progress"]);
        assert!(wf.targets_from("done").is_empty());
        assert!(wf.is_entry_state("todo"));
        assert!(!wf.is_entry_state("done"));
        assert_eq!(wf.entry_states(), vec!["todo", "in_progress"]);
    }

    #[test]
    fn deserializes_from_camel_case_json() {
        let entity: EntityDeclaration = serde_json::from_value(json!({
            "name": "Task",
            "pluralName": "Tasks",
            "fields": [
                {"name": "title", "type": "text", "required": true},
                {"name": "priority", "type": "enum", "options": ["low", "high"], "defaultValue": "low"},
                {"name": "body", "type": "rich_text"}
            ],
            "relationships": [
                {"type": "belongsTo", "entity": "Project", "foreignKey": "project_id"}
            ],
            "workflows": [],
            "permissions": {"delete": [{"effect": "deny"}]},
            "sideEffects": {"create": [{"kind": "webhook", "url": "https://example.com/hook"}]},
            "ui": {"icon": "check"}
        }))
        .unwrap();
        assert_eq!(entity.fields[2].field_type, FieldType::RichText);
        assert_eq!(entity.relationships[0].foreign_key.as_deref(), Some("project_id"));
        assert_eq!(entity.permissions[&Verb::Delete].len(), 1);
        assert_eq!(entity.input_names(), vec!["title", "priority", "body", "projectId"]);
        assert!(entity.validate().is_ok());
    }
}
