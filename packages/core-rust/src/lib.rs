//! `Stencil` Core: entity declarations, column kinds, input shapes, permission
//! rules, and workflow validation.

pub mod caller;
pub mod column;
pub mod entity;
pub mod layout;
pub mod naming;
pub mod permission;
pub mod shape;
pub mod workflow;

pub use caller::{Caller, CallerKind};
pub use column::{ColumnInfo, ColumnKind};
pub use entity::{
    DeclarationError, EntityDeclaration, FieldDeclaration, FieldType, RelationKind,
    RelationshipDeclaration, SideEffect, Transition, Verb, WorkflowDeclaration,
};
pub use layout::{ColumnSource, ColumnSpec, TableLayout};
pub use permission::{evaluate, Decision, Effect, Ownership, PermissionRule};
pub use shape::{check_field_value, FieldIssue, InputShape, IssueCode, ShapeField, ShapeKind};
pub use workflow::{validate_entry_states, validate_transitions, TransitionResult, WorkflowError};

/// A record keyed by API field names.
pub type Record = serde_json::Map<String, serde_json::Value>;

