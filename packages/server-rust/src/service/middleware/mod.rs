//! Tower middleware layers for the dispatch pipeline.
//!
//! - [`audit`]: Dispatch timing, metrics, and audit records
//! - [`pipeline`]: Composes all layers into a single service stack

pub mod audit;
pub mod pipeline;

pub use audit::{AuditLayer, AuditService};
pub use pipeline::{build_dispatch_pipeline, DispatchService};
