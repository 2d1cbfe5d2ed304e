//! Dispatch Pipeline: the single execution funnel for every caller.
//!
//! Stages run in a fixed order and each short-circuits on failure:
//! lookup, validate, authorize, build context, pre-hooks, execute,
//! post-hooks, side effects, emit. Timing and auditing wrap the whole thing
//! as a tower layer (see [`middleware`](super::middleware)).

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use serde_json::{Map, Value};
use stencil_core::{evaluate, Caller, Decision};
use tower::Service;
use tracing::{debug, error, Instrument};

use super::context::ExecutionContext;
use super::operation::{CompiledAction, DispatchError, OwnershipSubject};
use super::registry::ActionRegistry;
use super::side_effects::SideEffectRunner;
use crate::config::StencilConfig;
use crate::events::{Event, EventBus};
use crate::storage::TenantData;
use crate::traits::DataStore;

/// One call: which action, with what raw input, on whose behalf.
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub action: String,
    pub input: Value,
    pub caller: Caller,
}

impl DispatchRequest {
    #[must_use]
    pub fn new(action: impl Into<String>, input: Value, caller: Caller) -> Self {
        Self {
            action: action.into(),
            input,
            caller,
        }
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Innermost service of the pipeline. Cheap to clone.
#[derive(Clone)]
pub struct Dispatcher {
    actions: Arc<ActionRegistry>,
    store: Arc<dyn DataStore>,
    events: EventBus,
    effects: SideEffectRunner,
}

impl Dispatcher {
    #[must_use]
    pub fn new(
        actions: Arc<ActionRegistry>,
        store: Arc<dyn DataStore>,
        events: EventBus,
        config: &StencilConfig,
    ) -> Self {
        let effects = SideEffectRunner::new(events.clone(), config.webhook_timeout_ms);
        Self {
            actions,
            store,
            events,
            effects,
        }
    }

    /// Runs `request` through every stage.
    ///
    /// # Errors
    ///
    /// Returns the first stage failure. `Internal` errors are logged here
    /// with full detail before being returned.
    pub async fn dispatch(&self, request: DispatchRequest) -> Result<Value, DispatchError> {
        let action_id = request.action.clone();
        let result = self.run(request).await;
        if let Err(DispatchError::Internal(err)) = &result {
            error!(action = %action_id, error = ?err, "action failed");
        }
        result
    }

    async fn run(&self, request: DispatchRequest) -> Result<Value, DispatchError> {
        let DispatchRequest {
            action: action_id,
            input,
            caller,
        } = request;

        let Some(action) = self.actions.get(&action_id) else {
            return Err(DispatchError::UnknownAction { action: action_id });
        };

        let parsed = action
            .input_shape
            .parse(&input)
            .map_err(|issues| DispatchError::Validation { issues })?;

        let data = TenantData::new(self.store.clone(), caller.tenant_id.clone());

        let stored = self.ownership_subject(&action, &parsed, &data).await?;
        let subject = stored.as_ref().unwrap_or(&parsed);
        match evaluate(&action.permissions, &caller, subject) {
            Decision::Allow { rule } => debug!(action = %action.id, rule, "authorized"),
            Decision::Deny { rule } => {
                debug!(action = %action.id, ?rule, "denied");
                return Err(DispatchError::Permission { action: action_id });
            }
        }

        let ctx = ExecutionContext::new(&action.id, caller, data, self.events.clone());

        let mut payload = Value::Object(parsed);
        for hook in &action.pre_hooks {
            payload = hook(payload, &ctx)?;
        }
        let mut result = action
            .handler
            .execute(payload, &ctx)
            .instrument(ctx.span().clone())
            .await?;
        for hook in &action.post_hooks {
            result = hook(result, &ctx)?;
        }

        self.effects
            .run(&action.id, &action.side_effects, &result, &ctx.caller);
        self.events.emit(Event::new(
            action.id.clone(),
            ctx.caller.tenant_id.clone(),
            result.clone(),
        ));

        Ok(result)
    }

    /// Loads the stored record that ownership rules are checked against.
    ///
    /// `None` means the rules see the parsed input. Nothing is read when no
    /// rule of the action carries an ownership condition.
    async fn ownership_subject(
        &self,
        action: &CompiledAction,
        parsed: &Map<String, Value>,
        data: &TenantData,
    ) -> Result<Option<Map<String, Value>>, DispatchError> {
        let OwnershipSubject::Stored { layout } = &action.ownership_subject else {
            return Ok(None);
        };
        if !action.permissions.iter().any(|rule| rule.ownership.is_some()) {
            return Ok(None);
        }
        let id = parsed.get("id").and_then(Value::as_str).unwrap_or_default();
        match data.find_by_id(&layout.table, id).await? {
            Some(row) => Ok(Some(layout.from_row(&row))),
            None => Err(DispatchError::RecordNotFound {
                entity: layout.entity.clone(),
                id: id.to_string(),
            }),
        }
    }
}

impl Service<DispatchRequest> for Dispatcher {
    type Response = Value;
    type Error = DispatchError;
    type Future = Pin<Box<dyn Future<Output = Result<Value, DispatchError>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: DispatchRequest) -> Self::Future {
        let this = self.clone();
        Box::pin(async move { this.dispatch(request).await })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
