//! Application state: the composition root.
//!
//! Owns the registries, backends, event bus, and audit sink, and wires them
//! into a dispatch pipeline. Protocol adapters hold an `Arc<AppState>` and
//! call [`AppState::dispatch`].

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::Value;
use stencil_core::{DeclarationError, EntityDeclaration};
use tower::ServiceExt;
use tracing::{info, warn};

use crate::audit::TracingAuditSink;
use crate::config::StencilConfig;
use crate::events::EventBus;
use crate::schema::{MemorySchemaCatalog, ReconcileReport, SchemaEvolution};
use crate::service::middleware::{build_dispatch_pipeline, AuditService};
use crate::service::{
    compile_with, ActionRegistry, CompiledAction, DispatchError, DispatchRequest, Dispatcher,
    EntityHooks, EntityRegistry, RegistryError,
};
use crate::storage::MemoryDataStore;
use crate::traits::{AuditSink, DataStore, SchemaCatalog};

#[derive(Debug, thiserror::Error)]
pub enum BootError {
    #[error(transparent)]
    Declaration(#[from] DeclarationError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

pub struct AppState {
    pub config: StencilConfig,
    pub entities: Arc<EntityRegistry>,
    pub actions: Arc<ActionRegistry>,
    pub data: Arc<dyn DataStore>,
    pub catalog: Arc<dyn SchemaCatalog>,
    pub events: EventBus,
    pub audit: Option<Arc<dyn AuditSink>>,
}

impl AppState {
    /// Audit records go to [`TracingAuditSink`] unless `audit_enabled` is off.
    #[must_use]
    pub fn new(
        config: StencilConfig,
        data: Arc<dyn DataStore>,
        catalog: Arc<dyn SchemaCatalog>,
    ) -> Self {
        let audit: Option<Arc<dyn AuditSink>> = if config.audit_enabled {
            Some(Arc::new(TracingAuditSink))
        } else {
            None
        };
        Self {
            events: EventBus::new(config.event_channel_capacity),
            config,
            entities: Arc::new(EntityRegistry::new()),
            actions: Arc::new(ActionRegistry::new()),
            data,
            catalog,
            audit,
        }
    }

    /// Memory data store and memory schema catalog.
    #[must_use]
    pub fn in_memory(config: StencilConfig) -> Self {
        Self::new(
            config,
            Arc::new(MemoryDataStore::new()),
            Arc::new(MemorySchemaCatalog::new()),
        )
    }

    /// Replaces the audit sink. Ignored when `audit_enabled` is off.
    #[must_use]
    pub fn with_audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        if self.config.audit_enabled {
            self.audit = Some(sink);
        }
        self
    }

    /// Validates, reconciles, compiles, and registers `entities`.
    ///
    /// A failed boot registers nothing. Entities whose table could not be
    /// reconciled (unsafe identifier or catalog failure) are left out of
    /// both registries and can be booted again once the cause is fixed.
    ///
    /// # Errors
    ///
    /// Returns [`BootError`] for an invalid declaration or a duplicate
    /// entity or action. Schema drift never fails boot; it is reported in
    /// the returned [`ReconcileReport`].
    pub async fn boot(&self, entities: Vec<EntityDeclaration>) -> Result<ReconcileReport, BootError> {
        self.boot_with(entities, HashMap::new()).await
    }

    /// Like [`boot`](Self::boot), attaching lifecycle hooks keyed by entity name.
    ///
    /// # Errors
    ///
    /// See [`boot`](Self::boot).
    pub async fn boot_with(
        &self,
        entities: Vec<EntityDeclaration>,
        mut hooks: HashMap<String, EntityHooks>,
    ) -> Result<ReconcileReport, BootError> {
        let mut names = HashSet::new();
        for entity in &entities {
            entity.validate()?;
            if !names.insert(entity.name.as_str()) || self.entities.get(&entity.name).is_some() {
                return Err(RegistryError::DuplicateEntity {
                    name: entity.name.clone(),
                }
                .into());
            }
        }

        let mut compiled = Vec::with_capacity(entities.len());
        let mut ids = HashSet::new();
        for entity in &entities {
            let entity_hooks = hooks.remove(&entity.name).unwrap_or_default();
            let actions = compile_with(entity, entity_hooks, &self.config);
            for action in &actions {
                if !ids.insert(action.id.clone()) || self.actions.get(&action.id).is_some() {
                    return Err(RegistryError::DuplicateAction {
                        id: action.id.clone(),
                    }
                    .into());
                }
            }
            compiled.push(actions);
        }

        let report = SchemaEvolution::new(self.catalog.clone())
            .reconcile(&entities)
            .await;

        for (entity, actions) in entities.into_iter().zip(compiled) {
            if report.is_blocked(&entity.name) {
                warn!(entity = %entity.name, "table not reconciled; actions not registered");
                continue;
            }
            self.entities.register(entity)?;
            for action in actions {
                self.actions.register(action)?;
            }
        }

        info!(
            entities = self.entities.len(),
            actions = self.actions.len(),
            "boot complete"
        );
        Ok(report)
    }

    /// Registers a hand-written action next to the compiled ones.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicateAction`] if the id is taken.
    pub fn register_action(&self, action: CompiledAction) -> Result<(), RegistryError> {
        self.actions.register(action)
    }

    #[must_use]
    pub fn dispatcher(&self) -> Dispatcher {
        Dispatcher::new(
            self.actions.clone(),
            self.data.clone(),
            self.events.clone(),
            &self.config,
        )
    }

    /// Full pipeline: audit layer around the dispatcher.
    #[must_use]
    pub fn pipeline(&self) -> AuditService<Dispatcher> {
        build_dispatch_pipeline(self.dispatcher(), self.audit.clone())
    }

    /// # Errors
    ///
    /// Returns the pipeline's [`DispatchError`].
    pub async fn dispatch(&self, request: DispatchRequest) -> Result<Value, DispatchError> {
        self.pipeline().oneshot(request).await
    }

    /// Empties both registries. Backends are left untouched.
    pub fn clear(&self) {
        self.actions.clear();
        self.entities.clear();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
