//! `Stencil` Server: operation compiler, dispatch pipeline, and schema evolution.

pub mod audit;
pub mod config;
pub mod events;
pub mod schema;
pub mod service;
pub mod state;
pub mod storage;
pub mod traits;

pub use config::StencilConfig;
pub use events::{Event, EventBus};
pub use service::{
    CompiledAction, DispatchError, DispatchRequest, Dispatcher, EntityHooks, ErrorKind,
    HandlerError,
};
pub use state::{AppState, BootError};
pub use traits::{AuditSink, DataStore, SchemaCatalog};
