//! Pipeline composition: wraps the dispatcher with its middleware layers.

use std::sync::Arc;

use serde_json::Value;
use tower::ServiceBuilder;

use super::audit::{AuditLayer, AuditService};
use crate::service::dispatch::{DispatchRequest, Dispatcher};
use crate::service::operation::DispatchError;
use crate::traits::AuditSink;

/// Build the dispatch pipeline.
///
/// Layer order (outermost to innermost):
/// 1. `AuditLayer` -- timing, metrics, audit record (sees every outcome)
/// 2. `Dispatcher` -- lookup through emit
///
/// Timeouts and load shedding belong to the protocol layer in front of this
/// pipeline, not to the pipeline itself.
#[must_use]
pub fn build_dispatch_pipeline(
    dispatcher: Dispatcher,
    audit: Option<Arc<dyn AuditSink>>,
) -> AuditService<Dispatcher> {
    ServiceBuilder::new()
        .layer(AuditLayer::new(audit))
        .service(dispatcher)
}

/// Object-safe view of the pipeline for callers that only need `call`.
pub type DispatchService = tower::util::BoxCloneService<DispatchRequest, Value, DispatchError>;
