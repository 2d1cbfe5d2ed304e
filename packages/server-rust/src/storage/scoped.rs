//! Tenant-scoped data-access handle.
//!
//! [`TenantData`] binds a [`DataStore`] to one tenant for the lifetime of a
//! single dispatch. Handlers never see the unscoped store, so there is no
//! way for business logic to issue a query without a tenant.

use std::sync::Arc;

use serde_json::Value;
use stencil_core::layout::{ID_COLUMN, TENANT_COLUMN};

use super::{FindQuery, Row};
use crate::traits::DataStore;

#[derive(Clone)]
pub struct TenantData {
    store: Arc<dyn DataStore>,
    tenant_id: String,
}

impl TenantData {
    #[must_use]
    pub fn new(store: Arc<dyn DataStore>, tenant_id: impl Into<String>) -> Self {
        Self {
            store,
            tenant_id: tenant_id.into(),
        }
    }

    #[must_use]
    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    /// # Errors
    ///
    /// Propagates backend failures.
    pub async fn find_many(&self, table: &str, query: &FindQuery) -> anyhow::Result<Vec<Row>> {
        self.store.find_many(&self.tenant_id, table, query).await
    }

    /// # Errors
    ///
    /// Propagates backend failures.
    pub async fn find_by_id(&self, table: &str, id: &str) -> anyhow::Result<Option<Row>> {
        self.store.find_by_id(&self.tenant_id, table, id).await
    }

    /// Inserts `row`, stamping it with this handle's tenant.
    ///
    /// # Errors
    ///
    /// Propagates backend failures.
    pub async fn create(&self, table: &str, mut row: Row) -> anyhow::Result<Row> {
        row.insert(TENANT_COLUMN.to_string(), Value::String(self.tenant_id.clone()));
        self.store.create(&self.tenant_id, table, row).await
    }

    /// Updates `changes` on the row. Neither the id nor the tenant can be
    /// rewritten through an update.
    ///
    /// # Errors
    ///
    /// Propagates backend failures.
    pub async fn update(&self, table: &str, id: &str, mut changes: Row) -> anyhow::Result<Option<Row>> {
        changes.remove(ID_COLUMN);
        changes.remove(TENANT_COLUMN);
        self.store.update(&self.tenant_id, table, id, changes).await
    }

    /// # Errors
    ///
    /// Propagates backend failures.
    pub async fn delete(&self, table: &str, id: &str) -> anyhow::Result<bool> {
        self.store.delete(&self.tenant_id, table, id).await
    }

    /// # Errors
    ///
    /// Propagates backend failures.
    pub async fn count(&self, table: &str, filter: &Row) -> anyhow::Result<u64> {
        self.store.count(&self.tenant_id, table, filter).await
    }
}

impl std::fmt::Debug for TenantData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantData")
            .field("tenant_id", &self.tenant_id)
            .finish_non_exhaustive()
    }
}
