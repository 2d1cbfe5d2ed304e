//! Per-dispatch execution context.

use serde_json::Value;
use stencil_core::Caller;
use uuid::Uuid;

use crate::events::{Event, EventBus};
use crate::storage::TenantData;

/// Everything an action handler may touch, built fresh for one dispatch.
///
/// Data access is pre-scoped to the caller's tenant; there is no way to
/// reach another tenant's rows from here.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub call_id: Uuid,
    pub action: String,
    pub caller: Caller,
    pub data: TenantData,
    events: EventBus,
    span: tracing::Span,
}

impl ExecutionContext {
    #[must_use]
    pub fn new(action: impl Into<String>, caller: Caller, data: TenantData, events: EventBus) -> Self {
        let call_id = Uuid::new_v4();
        let action = action.into();
        let span = tracing::debug_span!("action", %call_id, action = %action);
        Self {
            call_id,
            action,
            caller,
            data,
            events,
            span,
        }
    }

    /// Publishes an event scoped to the caller's tenant.
    pub fn emit(&self, event_type: impl Into<String>, payload: Value) {
        self.events
            .emit(Event::new(event_type, self.caller.tenant_id.clone(), payload));
    }

    /// Span handlers log under.
    #[must_use]
    pub fn span(&self) -> &tracing::Span {
        &self.span
    }
}
