//! [`SchemaCatalog`](crate::traits::SchemaCatalog) implementations.

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::MemorySchemaCatalog;
#[cfg(feature = "postgres")]
pub use postgres::PgSchemaCatalog;
