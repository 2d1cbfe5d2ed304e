//! Schema Evolution Engine: reconciles live tables with declarations.
//!
//! - [`ddl`]: change representation, SQL rendering, literal escaping
//! - [`classify`]: safe/unsafe column type change classification
//! - [`evolution`]: planning and applying per-entity changes
//! - [`catalogs`]: live schema access (memory, `PostgreSQL`)

pub mod catalogs;
pub mod classify;
pub mod ddl;
pub mod evolution;

pub use catalogs::MemorySchemaCatalog;
#[cfg(feature = "postgres")]
pub use catalogs::PgSchemaCatalog;
pub use classify::{classify, TypeChange};
pub use ddl::{ColumnDef, ColumnDefault, SchemaChange, SchemaError, SqlLiteral};
pub use evolution::{EntityPlan, ReconcileReport, SchemaEvolution, SchemaWarning};
