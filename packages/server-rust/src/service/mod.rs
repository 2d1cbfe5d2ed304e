//! Operation compilation and dispatch.
//!
//! 1. **Compiler** (`compiler`): entity declaration -> five `CompiledAction`s
//! 2. **Registry** (`registry`): entity and action registries, write-once per id
//! 3. **Dispatch** (`dispatch`): lookup, validate, authorize, execute, emit
//! 4. **Middleware** (`middleware`): Tower layers (audit, metrics, tracing)
//! 5. **Side effects** (`side_effects`): emit, notify, and webhook delivery

pub mod compiler;
pub mod context;
pub mod dispatch;
pub mod middleware;
pub mod operation;
pub mod registry;
pub mod side_effects;

pub use compiler::{compile, compile_with, default_permissions, EntityHooks, RecordHook};
pub use context::ExecutionContext;
pub use dispatch::{DispatchRequest, Dispatcher};
pub use middleware::{build_dispatch_pipeline, AuditLayer, DispatchService};
pub use operation::{
    ActionHandler, CompiledAction, DispatchError, ErrorKind, FnHandler, HandlerError, Hook,
    OutputShape, OwnershipSubject,
};
pub use registry::{ActionRegistry, EntityRegistry, RegistryError};
pub use side_effects::SideEffectRunner;
