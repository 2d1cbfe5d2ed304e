//! Operation Compiler: entity declaration -> the five standard actions.
//!
//! Compilation is a pure function of the declaration (plus optional entity
//! hooks and list paging bounds). Handlers translate between API names and
//! storage columns through the entity's [`TableLayout`].

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Map, Value};
use stencil_core::layout::{CREATED_AT_COLUMN, ID_COLUMN, TENANT_COLUMN, UPDATED_AT_COLUMN};
use stencil_core::naming::{action_prefix, belongs_to_api_name};
use stencil_core::{
    validate_entry_states, validate_transitions, CallerKind, EntityDeclaration, FieldDeclaration,
    FieldType, InputShape, PermissionRule, Record, ShapeField, ShapeKind, TableLayout, Verb,
};
use tracing::debug;
use uuid::Uuid;

use super::context::ExecutionContext;
use super::operation::{ActionHandler, CompiledAction, HandlerError, OutputShape, OwnershipSubject};
use crate::config::StencilConfig;
use crate::storage::{FindQuery, OrderBy, SortDirection};

// ---------------------------------------------------------------------------
// Entity hooks
// ---------------------------------------------------------------------------

/// Record-level lifecycle callback. May transform the record or abort.
pub type RecordHook =
    Arc<dyn Fn(Record, &ExecutionContext) -> Result<Record, HandlerError> + Send + Sync>;

/// Lifecycle callbacks attached to an entity at compile time.
///
/// `before_*` hooks see the payload about to be written (for delete, the
/// record about to be removed) and may abort the action. `after_*` hooks see
/// the stored record and may reshape what the caller receives. The result of
/// `before_delete` is ignored apart from aborting.
#[derive(Clone, Default)]
pub struct EntityHooks {
    pub before_create: Option<RecordHook>,
    pub after_create: Option<RecordHook>,
    pub before_update: Option<RecordHook>,
    pub after_update: Option<RecordHook>,
    pub before_delete: Option<RecordHook>,
    pub after_delete: Option<RecordHook>,
}

macro_rules! hook_setter {
    ($name:ident) => {
        #[must_use]
        pub fn $name<F>(mut self, hook: F) -> Self
        where
            F: Fn(Record, &ExecutionContext) -> Result<Record, HandlerError>
                + Send
                + Sync
                + 'static,
        {
            self.$name = Some(Arc::new(hook));
            self
        }
    };
}

impl EntityHooks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    hook_setter!(before_create);
    hook_setter!(after_create);
    hook_setter!(before_update);
    hook_setter!(after_update);
    hook_setter!(before_delete);
    hook_setter!(after_delete);
}

impl fmt::Debug for EntityHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityHooks")
            .field("before_create", &self.before_create.is_some())
            .field("after_create", &self.after_create.is_some())
            .field("before_update", &self.before_update.is_some())
            .field("after_update", &self.after_update.is_some())
            .field("before_delete", &self.before_delete.is_some())
            .field("after_delete", &self.after_delete.is_some())
            .finish()
    }
}

fn run_hook(
    hook: Option<&RecordHook>,
    record: Record,
    ctx: &ExecutionContext,
) -> Result<Record, HandlerError> {
    match hook {
        Some(hook) => hook(record, ctx),
        None => Ok(record),
    }
}

// ---------------------------------------------------------------------------
// compile
// ---------------------------------------------------------------------------

/// Compiles the five standard actions for `entity` with no hooks.
#[must_use]
pub fn compile(entity: &EntityDeclaration, config: &StencilConfig) -> Vec<CompiledAction> {
    compile_with(entity, EntityHooks::default(), config)
}

/// Compiles create, list, get, update and delete for `entity`.
#[must_use]
pub fn compile_with(
    entity: &EntityDeclaration,
    hooks: EntityHooks,
    config: &StencilConfig,
) -> Vec<CompiledAction> {
    let layout = Arc::new(TableLayout::for_entity(entity));
    let runtime = Arc::new(EntityRuntime {
        layout: layout.clone(),
        entity: entity.clone(),
        hooks,
    });
    let prefix = action_prefix(&entity.name);
    let name = &entity.name;

    debug!(entity = %name, "compiling actions");

    Verb::ALL
        .iter()
        .map(|&verb| {
            let (description, input, output, handler): (
                String,
                InputShape,
                OutputShape,
                Arc<dyn ActionHandler>,
            ) = match verb {
                Verb::Create => (
                    format!("Create a new {name}."),
                    create_shape(entity),
                    OutputShape::Record { entity: name.clone() },
                    Arc::new(CreateHandler(runtime.clone())),
                ),
                Verb::List => (
                    format!(
                        "List {} with optional equality filters, sorting and paging.",
                        entity.plural_name
                    ),
                    list_shape(&runtime.layout, config),
                    OutputShape::Page { entity: name.clone() },
                    Arc::new(ListHandler(runtime.clone())),
                ),
                Verb::Get => (
                    format!("Get a single {name} by id."),
                    id_shape(),
                    OutputShape::Record { entity: name.clone() },
                    Arc::new(GetHandler(runtime.clone())),
                ),
                Verb::Update => (
                    format!("Update fields of an existing {name}."),
                    update_shape(entity),
                    OutputShape::Record { entity: name.clone() },
                    Arc::new(UpdateHandler(runtime.clone())),
                ),
                Verb::Delete => (
                    format!("Delete a {name} by id."),
                    id_shape(),
                    OutputShape::Deleted,
                    Arc::new(DeleteHandler(runtime.clone())),
                ),
            };

            let description = match &entity.description {
                Some(extra) => format!("{description} {extra}"),
                None => description,
            };

            CompiledAction {
                id: format!("{prefix}.{}", verb.as_str()),
                entity: Some(name.clone()),
                verb: Some(verb),
                description,
                input_shape: input,
                output_shape: output,
                permissions: entity
                    .permissions
                    .get(&verb)
                    .cloned()
                    .unwrap_or_else(|| default_permissions(verb)),
                ownership_subject: match verb {
                    Verb::Get | Verb::Update | Verb::Delete => OwnershipSubject::Stored {
                        layout: layout.clone(),
                    },
                    Verb::Create | Verb::List => OwnershipSubject::Input,
                },
                idempotent: matches!(verb, Verb::List | Verb::Get | Verb::Delete),
                affects_entities: if verb.is_read() {
                    Vec::new()
                } else {
                    vec![name.clone()]
                },
                example: Some(example_input(entity, verb)),
                pre_hooks: Vec::new(),
                post_hooks: Vec::new(),
                side_effects: entity.side_effects.get(&verb).cloned().unwrap_or_default(),
                handler,
            }
        })
        .collect()
}

/// Rules applied when a declaration gives none for `verb`.
#[must_use]
pub fn default_permissions(verb: Verb) -> Vec<PermissionRule> {
    match verb {
        Verb::Delete => vec![
            PermissionRule::deny().for_callers(&[CallerKind::AiAgent]),
            PermissionRule::allow().for_callers(&[CallerKind::Human, CallerKind::System]),
        ],
        _ => vec![PermissionRule::allow().for_callers(&[
            CallerKind::Human,
            CallerKind::AiAgent,
            CallerKind::System,
        ])],
    }
}

// ---------------------------------------------------------------------------
// Input shapes
// ---------------------------------------------------------------------------

fn field_kind(field: &FieldDeclaration) -> ShapeKind {
    ShapeKind::Field {
        field_type: field.field_type,
        options: field.options.clone(),
    }
}

/// belongsTo inputs not already declared as fields.
fn relation_inputs(entity: &EntityDeclaration) -> Vec<ShapeField> {
    let mut inputs: Vec<ShapeField> = Vec::new();
    for rel in entity.belongs_to() {
        let api = belongs_to_api_name(rel);
        if entity.find_field(&api).is_some() || inputs.iter().any(|f| f.name == api) {
            continue;
        }
        inputs.push(ShapeField::new(api, ShapeKind::Uuid).nullable());
    }
    inputs
}

fn create_shape(entity: &EntityDeclaration) -> InputShape {
    let mut fields: Vec<ShapeField> = entity
        .fields
        .iter()
        .map(|field| {
            let mut shape = ShapeField::new(&field.name, field_kind(field));
            match (&field.default_value, field.required) {
                (Some(default), _) => shape = shape.with_default(default.clone()),
                (None, true) => shape = shape.required(),
                (None, false) => {}
            }
            if !field.required {
                shape = shape.nullable();
            }
            shape
        })
        .collect();
    fields.extend(relation_inputs(entity));
    InputShape::new(fields)
}

fn update_shape(entity: &EntityDeclaration) -> InputShape {
    let mut fields = vec![ShapeField::new("id", ShapeKind::Uuid).required()];
    fields.extend(entity.fields.iter().map(|field| {
        let shape = ShapeField::new(&field.name, field_kind(field));
        if field.required {
            shape
        } else {
            shape.nullable()
        }
    }));
    fields.extend(relation_inputs(entity));
    InputShape::new(fields)
}

fn id_shape() -> InputShape {
    InputShape::new(vec![ShapeField::new("id", ShapeKind::Uuid).required()])
}

fn list_shape(layout: &TableLayout, config: &StencilConfig) -> InputShape {
    let filterable: Vec<String> = layout
        .columns
        .iter()
        .filter(|c| c.name != TENANT_COLUMN)
        .map(|c| c.api_name.clone())
        .collect();
    InputShape::new(vec![
        ShapeField::new("where", ShapeKind::Object { keys: filterable.clone() }),
        ShapeField::new("orderBy", ShapeKind::OneOf { values: filterable }),
        ShapeField::new(
            "orderDir",
            ShapeKind::OneOf {
                values: vec!["asc".into(), "desc".into()],
            },
        )
        .with_default(json!("asc")),
        ShapeField::new(
            "limit",
            ShapeKind::Integer {
                min: 1,
                max: Some(i64::from(config.max_list_limit)),
            },
        )
        .with_default(json!(config.default_list_limit)),
        ShapeField::new("offset", ShapeKind::Integer { min: 0, max: None }).with_default(json!(0)),
    ])
}

// ---------------------------------------------------------------------------
// Examples
// ---------------------------------------------------------------------------

const EXAMPLE_ID: &str = "00000000-0000-4000-8000-000000000000";

fn sample_value(entity: &EntityDeclaration, field: &FieldDeclaration) -> Value {
    if let Some(flow) = entity.workflows.iter().find(|w| w.field == field.name) {
        if let Some(state) = flow.entry_states().into_iter().next() {
            return json!(state);
        }
    }
    match field.field_type {
        FieldType::Text => json!(format!("Example {}", field.name)),
        FieldType::Email => json!("user@example.com"),
        FieldType::Phone => json!("+1 555 0100"),
        FieldType::Url => json!("https://example.com"),
        FieldType::Currency => json!(100),
        FieldType::Number => json!(1),
        FieldType::Percentage => json!(50),
        FieldType::Date => json!("2024-01-01"),
        FieldType::Datetime => json!("2024-01-01T09:00:00Z"),
        FieldType::Enum => field.options.first().map_or_else(|| json!("value"), |o| json!(o)),
        FieldType::RichText => json!("<p>Example</p>"),
        FieldType::Boolean => json!(true),
    }
}

fn example_input(entity: &EntityDeclaration, verb: Verb) -> Value {
    match verb {
        Verb::Create => {
            let example: Map<String, Value> = entity
                .fields
                .iter()
                .filter(|f| f.required && f.default_value.is_none())
                .map(|f| (f.name.clone(), sample_value(entity, f)))
                .collect();
            Value::Object(example)
        }
        Verb::List => json!({ "limit": 10 }),
        Verb::Get | Verb::Delete => json!({ "id": EXAMPLE_ID }),
        Verb::Update => {
            let mut example = json!({ "id": EXAMPLE_ID });
            if let Some(field) = entity.fields.first() {
                example[field.name.as_str()] = sample_value(entity, field);
            }
            example
        }
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

struct EntityRuntime {
    entity: EntityDeclaration,
    layout: Arc<TableLayout>,
    hooks: EntityHooks,
}

impl EntityRuntime {
    fn not_found(&self, id: &str) -> HandlerError {
        HandlerError::NotFound {
            entity: self.entity.name.clone(),
            id: id.to_string(),
        }
    }

    async fn load(&self, ctx: &ExecutionContext, id: &str) -> Result<Record, HandlerError> {
        let row = ctx
            .data
            .find_by_id(&self.layout.table, id)
            .await?
            .ok_or_else(|| self.not_found(id))?;
        Ok(self.layout.from_row(&row))
    }
}

fn into_record(input: Value) -> Record {
    match input {
        Value::Object(map) => map,
        _ => Record::new(),
    }
}

fn take_id(record: &mut Record) -> String {
    match record.remove("id") {
        Some(Value::String(id)) => id,
        _ => String::new(),
    }
}

fn now() -> Value {
    json!(Utc::now().to_rfc3339())
}

struct CreateHandler(Arc<EntityRuntime>);

#[async_trait]
impl ActionHandler for CreateHandler {
    async fn execute(&self, input: Value, ctx: &ExecutionContext) -> Result<Value, HandlerError> {
        let rt = &self.0;
        let record = run_hook(rt.hooks.before_create.as_ref(), into_record(input), ctx)?;
        // Checked after the hook so it cannot start a record mid-workflow either.
        validate_entry_states(&rt.entity.workflows, &record)?;

        let mut row = rt.layout.to_row(&record);
        let stamp = now();
        row.insert(ID_COLUMN.to_string(), json!(Uuid::new_v4().to_string()));
        row.insert(CREATED_AT_COLUMN.to_string(), stamp.clone());
        row.insert(UPDATED_AT_COLUMN.to_string(), stamp);

        let stored = ctx.data.create(&rt.layout.table, row).await?;
        let created = run_hook(rt.hooks.after_create.as_ref(), rt.layout.from_row(&stored), ctx)?;
        Ok(Value::Object(created))
    }
}

struct ListHandler(Arc<EntityRuntime>);

#[async_trait]
impl ActionHandler for ListHandler {
    async fn execute(&self, input: Value, ctx: &ExecutionContext) -> Result<Value, HandlerError> {
        let rt = &self.0;
        let input = into_record(input);

        let filter = input
            .get("where")
            .and_then(Value::as_object)
            .map(|w| rt.layout.to_row(w))
            .unwrap_or_default();
        let direction = match input.get("orderDir").and_then(Value::as_str) {
            Some("desc") => SortDirection::Desc,
            _ => SortDirection::Asc,
        };
        let order_by = input
            .get("orderBy")
            .and_then(Value::as_str)
            .and_then(|name| rt.layout.by_api_name(name))
            .map(|col| OrderBy {
                column: col.name.clone(),
                direction,
            });
        let query = FindQuery {
            filter,
            order_by,
            limit: input.get("limit").and_then(Value::as_u64),
            offset: input.get("offset").and_then(Value::as_u64).unwrap_or_default(),
        };

        let rows = ctx.data.find_many(&rt.layout.table, &query).await?;
        let total = ctx.data.count(&rt.layout.table, &query.filter).await?;
        let items: Vec<Value> = rows
            .iter()
            .map(|row| Value::Object(rt.layout.from_row(row)))
            .collect();
        Ok(json!({ "items": items, "total": total }))
    }
}

struct GetHandler(Arc<EntityRuntime>);

#[async_trait]
impl ActionHandler for GetHandler {
    async fn execute(&self, input: Value, ctx: &ExecutionContext) -> Result<Value, HandlerError> {
        let id = take_id(&mut into_record(input));
        Ok(Value::Object(self.0.load(ctx, &id).await?))
    }
}

struct UpdateHandler(Arc<EntityRuntime>);

#[async_trait]
impl ActionHandler for UpdateHandler {
    async fn execute(&self, input: Value, ctx: &ExecutionContext) -> Result<Value, HandlerError> {
        let rt = &self.0;
        let mut changes = into_record(input);
        let id = take_id(&mut changes);
        let current = rt.load(ctx, &id).await?;

        // Workflow rules judge what is actually written, hook edits included.
        let mut changes = run_hook(rt.hooks.before_update.as_ref(), changes, ctx)?;
        changes.remove("id");
        let transitions = validate_transitions(&rt.entity.workflows, &changes, &current)?;

        let mut row = rt.layout.to_row(&changes);
        row.insert(UPDATED_AT_COLUMN.to_string(), now());
        let stored = ctx
            .data
            .update(&rt.layout.table, &id, row)
            .await?
            .ok_or_else(|| rt.not_found(&id))?;

        let event_type = format!("{}.transition", action_prefix(&rt.entity.name));
        for transition in transitions.iter().filter(|t| !t.triggers.is_empty()) {
            ctx.emit(
                event_type.as_str(),
                json!({
                    "entity": rt.entity.name,
                    "id": id,
                    "field": transition.field,
                    "from": transition.from,
                    "to": transition.to,
                    "triggers": transition.triggers,
                }),
            );
        }

        let updated = run_hook(rt.hooks.after_update.as_ref(), rt.layout.from_row(&stored), ctx)?;
        Ok(Value::Object(updated))
    }
}

struct DeleteHandler(Arc<EntityRuntime>);

#[async_trait]
impl ActionHandler for DeleteHandler {
    async fn execute(&self, input: Value, ctx: &ExecutionContext) -> Result<Value, HandlerError> {
        let rt = &self.0;
        let id = take_id(&mut into_record(input));
        let current = rt.load(ctx, &id).await?;
        run_hook(rt.hooks.before_delete.as_ref(), current.clone(), ctx)?;

        if !ctx.data.delete(&rt.layout.table, &id).await? {
            return Err(rt.not_found(&id));
        }
        run_hook(rt.hooks.after_delete.as_ref(), current, ctx)?;
        Ok(json!({ "id": id, "deleted": true }))
    }
}

#[cfg(test)]
mod tests {
    use stencil_core::{Caller, RelationshipDeclaration, Transition, WorkflowDeclaration};

    use super::*;

    fn task() -> EntityDeclaration {
        EntityDeclaration::new("Task", "Tasks")
            .field(FieldDeclaration::new("title", FieldType::Text).required())
            .field(
                FieldDeclaration::new("status", FieldType::Enum)
                    .required()
                    .with_options(["todo", "in_progress", "review", "done"])
                    .with_default(json!("todo")),
            )
            .relationship(RelationshipDeclaration::belongs_to("Project").with_foreign_key("project_id"))
            .workflow(WorkflowDeclaration::new(
                "status",
                vec![
                    Transition::new("todo", "in_progress"),
                    Transition::new("in_progress", "review"),
                    Transition::new("review", "done").triggers("task.completed"),
                ],
            ))
    }

    fn action<'a>(actions: &'a [CompiledAction], id: &str) -> &'a CompiledAction {
        actions.iter().find(|a| a.id == id).unwrap()
    }

    #[test]
    fn compiles_exactly_five_actions() {
        let actions = compile(&task(), &StencilConfig::default());
        let ids: Vec<&str> = actions.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(
            ids,
            vec!["task.create", "task.list", "task.get", "task.update", "task.delete"]
        );
    }

    #[test]
    fn multiword_entities_get_snake_case_ids() {
        let entity = EntityDeclaration::new("ProjectTask", "ProjectTasks");
        let actions = compile(&entity, &StencilConfig::default());
        assert_eq!(actions[0].id, "project_task.create");
    }

    #[test]
    fn required_field_with_default_is_optional_on_create() {
        let actions = compile(&task(), &StencilConfig::default());
        let create = action(&actions, "task.create");
        let parsed = create
            .input_shape
            .parse(&json!({"title": "Write docs"}))
            .unwrap();
        assert_eq!(parsed.get("status"), Some(&json!("todo")));

        let issues = create.input_shape.parse(&json!({})).unwrap_err();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].path, "title");
    }

    #[test]
    fn belongs_to_input_uses_camel_case_api_name() {
        let actions = compile(&task(), &StencilConfig::default());
        for id in ["task.create", "task.update"] {
            let shape = &action(&actions, id).input_shape;
            assert!(shape.field("projectId").is_some(), "{id} accepts projectId");
            assert!(shape.field("project_id").is_none(), "{id} never accepts project_id");
        }
        let parsed = action(&actions, "task.create")
            .input_shape
            .parse(&json!({"title": "x", "project_id": EXAMPLE_ID}))
            .unwrap();
        assert!(!parsed.contains_key("project_id"));
    }

    #[test]
    fn metadata_flags() {
        let actions = compile(&task(), &StencilConfig::default());
        for a in &actions {
            let verb = a.verb.unwrap();
            assert_eq!(a.idempotent, matches!(verb, Verb::List | Verb::Get | Verb::Delete));
            assert!(a.example.is_some());
            assert!(!a.description.is_empty());
        }
        assert_eq!(action(&actions, "task.update").affects_entities, vec!["Task"]);
        assert_eq!(action(&actions, "task.delete").affects_entities, vec!["Task"]);
        assert!(action(&actions, "task.get").affects_entities.is_empty());
    }

    #[test]
    fn default_permissions_keep_agents_from_deleting() {
        let actions = compile(&task(), &StencilConfig::default());
        let agent = Caller::new("bot", "t1", CallerKind::AiAgent);
        let human = Caller::human("u1", "t1");
        let hook = Caller::new("hook", "t1", CallerKind::Webhook);
        let input = Map::new();

        assert!(action(&actions, "task.update").permits(&agent, &input));
        assert!(!action(&actions, "task.delete").permits(&agent, &input));
        assert!(action(&actions, "task.delete").permits(&human, &input));
        assert!(!action(&actions, "task.get").permits(&hook, &input));
    }

    #[test]
    fn declared_permissions_override_defaults() {
        let entity = task().permission(Verb::Get, vec![]);
        let actions = compile(&entity, &StencilConfig::default());
        assert!(action(&actions, "task.get").permissions.is_empty());
        assert!(!action(&actions, "task.list").permissions.is_empty());
    }

    #[test]
    fn list_shape_bounds_limit_and_filter_keys() {
        let config = StencilConfig::default();
        let actions = compile(&task(), &config);
        let list = &action(&actions, "task.list").input_shape;

        let parsed = list.parse(&json!({})).unwrap();
        assert_eq!(parsed["limit"], json!(config.default_list_limit));
        assert_eq!(parsed["offset"], json!(0));

        assert!(list.parse(&json!({"limit": 1000})).is_err());
        assert!(list.parse(&json!({"where": {"secret": 1}})).is_err());
        assert!(list.parse(&json!({"where": {"tenantId": "other"}})).is_err());
        assert!(list
            .parse(&json!({"where": {"status": "todo", "projectId": EXAMPLE_ID}, "orderBy": "createdAt"}))
            .is_ok());
    }

    #[test]
    fn create_example_uses_entry_state_for_workflow_fields() {
        let entity = EntityDeclaration::new("Deal", "Deals")
            .field(FieldDeclaration::new("stage", FieldType::Text).required())
            .workflow(WorkflowDeclaration::new(
                "stage",
                vec![Transition::new("lead", "won")],
            ));
        let actions = compile(&entity, &StencilConfig::default());
        assert_eq!(
            action(&actions, "deal.create").example,
            Some(json!({"stage": "lead"}))
        );
    }
}
