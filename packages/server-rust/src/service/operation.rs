//! Action types shared by the compiler, registry, and dispatch pipeline.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use stencil_core::{
    Caller, FieldIssue, InputShape, PermissionRule, SideEffect, TableLayout, Verb, WorkflowError,
};

use super::context::ExecutionContext;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Closed error taxonomy surfaced to protocol adapters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Validation,
    Permission,
    Workflow,
    Unknown,
}

impl ErrorKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Validation => "validation",
            Self::Permission => "permission",
            Self::Workflow => "workflow",
            Self::Unknown => "unknown",
        }
    }
}

/// Errors returned by dispatch.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("unknown action: {action}")]
    UnknownAction { action: String },
    #[error("{entity} `{id}` not found")]
    RecordNotFound { entity: String, id: String },
    #[error("input validation failed ({} issue(s))", issues.len())]
    Validation { issues: Vec<FieldIssue> },
    #[error("permission denied for {action}")]
    Permission { action: String },
    #[error(transparent)]
    Workflow(#[from] WorkflowError),
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl DispatchError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownAction { .. } | Self::RecordNotFound { .. } => ErrorKind::NotFound,
            Self::Validation { .. } => ErrorKind::Validation,
            Self::Permission { .. } => ErrorKind::Permission,
            Self::Workflow(_) => ErrorKind::Workflow,
            Self::Internal(_) => ErrorKind::Unknown,
        }
    }

    /// Message safe to show the caller. Internal detail is never included.
    #[must_use]
    pub fn public_message(&self) -> String {
        match self {
            Self::Internal(_) => "internal error".to_string(),
            other => other.to_string(),
        }
    }

    /// Structured, caller-safe detail for the first four kinds.
    #[must_use]
    pub fn details(&self) -> Option<Value> {
        match self {
            Self::Validation { issues } => Some(json!({ "issues": issues })),
            Self::Workflow(WorkflowError::IllegalTransition {
                field,
                from,
                to,
                valid_targets,
            }) => Some(json!({
                "field": field,
                "from": from,
                "to": to,
                "validTargets": valid_targets,
            })),
            Self::Workflow(WorkflowError::MissingRequiredField {
                field,
                from,
                to,
                required,
            }) => Some(json!({
                "field": field,
                "from": from,
                "to": to,
                "requiredField": required,
            })),
            Self::Workflow(WorkflowError::InvalidEntryState {
                field,
                value,
                valid_entry_states,
            }) => Some(json!({
                "field": field,
                "value": value,
                "validEntryStates": valid_entry_states,
            })),
            Self::UnknownAction { action } => Some(json!({ "action": action })),
            Self::RecordNotFound { entity, id } => Some(json!({ "entity": entity, "id": id })),
            Self::Permission { .. } | Self::Internal(_) => None,
        }
    }

    /// Caller-facing error body: `{ kind, message, details? }`.
    #[must_use]
    pub fn to_json(&self) -> Value {
        let mut body = json!({
            "kind": self.kind(),
            "message": self.public_message(),
        });
        if let Some(details) = self.details() {
            body["details"] = details;
        }
        body
    }
}

/// Errors raised by action handlers and hooks.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error(transparent)]
    Workflow(#[from] WorkflowError),
    #[error("{entity} `{id}` not found")]
    NotFound { entity: String, id: String },
    #[error("invalid input")]
    Validation(Vec<FieldIssue>),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<HandlerError> for DispatchError {
    fn from(err: HandlerError) -> Self {
        match err {
            HandlerError::Workflow(e) => Self::Workflow(e),
            HandlerError::NotFound { entity, id } => Self::RecordNotFound { entity, id },
            HandlerError::Validation(issues) => Self::Validation { issues },
            HandlerError::Internal(e) => Self::Internal(e),
        }
    }
}

// ---------------------------------------------------------------------------
// Handlers and hooks
// ---------------------------------------------------------------------------

/// Business logic of an action. Receives input that already passed shape
/// validation and authorization.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn execute(&self, input: Value, ctx: &ExecutionContext) -> Result<Value, HandlerError>;
}

/// Adapts an async closure into an [`ActionHandler`].
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F, Fut> ActionHandler for FnHandler<F>
where
    F: Fn(Value, ExecutionContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, HandlerError>> + Send,
{
    async fn execute(&self, input: Value, ctx: &ExecutionContext) -> Result<Value, HandlerError> {
        (self.0)(input, ctx.clone()).await
    }
}

/// Pre/post hook: may transform the payload or abort with an error.
pub type Hook = Arc<dyn Fn(Value, &ExecutionContext) -> Result<Value, HandlerError> + Send + Sync>;

// ---------------------------------------------------------------------------
// CompiledAction
// ---------------------------------------------------------------------------

/// What an action returns, for protocol adapters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputShape {
    /// A single record of `entity`.
    Record { entity: String },
    /// `{ items: [...], total }` of `entity` records.
    Page { entity: String },
    /// `{ id, deleted: true }`.
    Deleted,
    /// Free-form result of a custom action.
    Any,
}

impl OutputShape {
    #[must_use]
    pub fn describe(&self) -> Value {
        match self {
            Self::Record { entity } => json!({ "type": "object", "entity": entity }),
            Self::Page { entity } => json!({
                "type": "object",
                "properties": {
                    "items": { "type": "array", "items": { "entity": entity } },
                    "total": { "type": "integer" },
                },
            }),
            Self::Deleted => json!({
                "type": "object",
                "properties": {
                    "id": { "type": "string", "format": "uuid" },
                    "deleted": { "type": "boolean" },
                },
            }),
            Self::Any => json!({}),
        }
    }
}

/// What ownership rules compare against the caller.
#[derive(Debug, Clone, Default)]
pub enum OwnershipSubject {
    /// The validated input. Right for create and for custom actions.
    #[default]
    Input,
    /// The stored record named by the input's `id`, read through `layout`.
    Stored { layout: Arc<TableLayout> },
}

/// A named, typed, permissioned unit of work.
///
/// Built once at boot (by the compiler or by hand), registered once, and
/// immutable afterwards.
#[derive(Clone)]
pub struct CompiledAction {
    pub id: String,
    pub entity: Option<String>,
    pub verb: Option<Verb>,
    pub description: String,
    pub input_shape: InputShape,
    pub output_shape: OutputShape,
    /// Evaluated first-match-wins; empty denies everyone.
    pub permissions: Vec<PermissionRule>,
    pub ownership_subject: OwnershipSubject,
    pub idempotent: bool,
    pub affects_entities: Vec<String>,
    pub example: Option<Value>,
    /// Run in order after authorization, before the handler.
    pub pre_hooks: Vec<Hook>,
    /// Run in order on the handler's result.
    pub post_hooks: Vec<Hook>,
    pub side_effects: Vec<SideEffect>,
    pub handler: Arc<dyn ActionHandler>,
}

impl CompiledAction {
    /// A custom action with no input fields, no permissions, and no hooks.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        description: impl Into<String>,
        handler: impl ActionHandler + 'static,
    ) -> Self {
        Self {
            id: id.into(),
            entity: None,
            verb: None,
            description: description.into(),
            input_shape: InputShape::default(),
            output_shape: OutputShape::Any,
            permissions: Vec::new(),
            ownership_subject: OwnershipSubject::Input,
            idempotent: false,
            affects_entities: Vec::new(),
            example: None,
            pre_hooks: Vec::new(),
            post_hooks: Vec::new(),
            side_effects: Vec::new(),
            handler: Arc::new(handler),
        }
    }

    #[must_use]
    pub fn with_input(mut self, shape: InputShape) -> Self {
        self.input_shape = shape;
        self
    }

    #[must_use]
    pub fn with_output(mut self, shape: OutputShape) -> Self {
        self.output_shape = shape;
        self
    }

    #[must_use]
    pub fn with_permissions(mut self, rules: Vec<PermissionRule>) -> Self {
        self.permissions = rules;
        self
    }

    #[must_use]
    pub fn with_ownership_subject(mut self, subject: OwnershipSubject) -> Self {
        self.ownership_subject = subject;
        self
    }

    #[must_use]
    pub fn with_side_effect(mut self, effect: SideEffect) -> Self {
        self.side_effects.push(effect);
        self
    }

    #[must_use]
    pub fn with_pre_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(Value, &ExecutionContext) -> Result<Value, HandlerError> + Send + Sync + 'static,
    {
        self.pre_hooks.push(Arc::new(hook));
        self
    }

    #[must_use]
    pub fn with_post_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(Value, &ExecutionContext) -> Result<Value, HandlerError> + Send + Sync + 'static,
    {
        self.post_hooks.push(Arc::new(hook));
        self
    }

    #[must_use]
    pub fn with_example(mut self, example: Value) -> Self {
        self.example = Some(example);
        self
    }

    #[must_use]
    pub fn idempotent(mut self) -> Self {
        self.idempotent = true;
        self
    }

    #[must_use]
    pub fn affects(mut self, entity: impl Into<String>) -> Self {
        self.affects_entities.push(entity.into());
        self
    }

    /// Whether the rules allow `caller` against `subject`: the parsed input,
    /// or the stored record for actions with a stored ownership subject.
    #[must_use]
    pub fn permits(&self, caller: &Caller, subject: &serde_json::Map<String, Value>) -> bool {
        stencil_core::evaluate(&self.permissions, caller, subject).is_allowed()
    }

    /// Metadata for discovery by protocol adapters.
    #[must_use]
    pub fn describe(&self) -> Value {
        json!({
            "id": self.id,
            "entity": self.entity,
            "verb": self.verb,
            "description": self.description,
            "input": self.input_shape.describe(),
            "output": self.output_shape.describe(),
            "idempotent": self.idempotent,
            "affectsEntities": self.affects_entities,
            "example": self.example,
        })
    }
}

impl fmt::Debug for CompiledAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledAction")
            .field("id", &self.id)
            .field("entity", &self.entity)
            .field("verb", &self.verb)
            .field("permissions", &self.permissions.len())
            .field("ownership_subject", &self.ownership_subject)
            .field("pre_hooks", &self.pre_hooks.len())
            .field("post_hooks", &self.post_hooks.len())
            .field("side_effects", &self.side_effects)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use stencil_core::{IssueCode, Transition, WorkflowDeclaration};

    use super::*;

    #[test]
    fn kinds_cover_the_taxonomy() {
        assert_eq!(
            DispatchError::UnknownAction { action: "x".into() }.kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            DispatchError::Validation { issues: vec![] }.kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            DispatchError::Permission { action: "x".into() }.kind(),
            ErrorKind::Permission
        );
        assert_eq!(
            DispatchError::Internal(anyhow::anyhow!("boom")).kind(),
            ErrorKind::Unknown
        );
    }

    #[test]
    fn internal_detail_is_hidden_from_callers() {
        let err = DispatchError::Internal(anyhow::anyhow!("connection refused to 10.0.0.3"));
        assert_eq!(err.public_message(), "internal error");
        assert!(err.details().is_none());
        assert_eq!(err.to_json()["kind"], json!("unknown"));
    }

    #[test]
    fn workflow_details_carry_valid_targets() {
        let flow = WorkflowDeclaration::new("status", vec![Transition::new("todo", "doing")]);
        let err = DispatchError::Workflow(WorkflowError::IllegalTransition {
            field: flow.field.clone(),
            from: "todo".into(),
            to: "done".into(),
            valid_targets: flow.targets_from("todo"),
        });
        let body = err.to_json();
        assert_eq!(body["kind"], json!("workflow"));
        assert_eq!(body["details"]["validTargets"], json!(["doing"]));
    }

    #[test]
    fn handler_errors_map_into_the_taxonomy() {
        let err: DispatchError = HandlerError::Validation(vec![FieldIssue::new(
            "title",
            IssueCode::Required,
            "required",
        )])
        .into();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let err: DispatchError = HandlerError::NotFound {
            entity: "Task".into(),
            id: "1".into(),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
