use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use stencil_core::EntityDeclaration;

use super::operation::CompiledAction;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("action `{id}` is already registered")]
    DuplicateAction { id: String },
    #[error("entity `{name}` is already registered")]
    DuplicateEntity { name: String },
}

// ---------------------------------------------------------------------------
// ActionRegistry
// ---------------------------------------------------------------------------

/// Name -> action lookup shared by the dispatch pipeline and protocol adapters.
///
/// Each id may be registered once; a second registration is a startup
/// error. Registration order is kept so listings are deterministic.
pub struct ActionRegistry {
    by_id: DashMap<String, Arc<CompiledAction>>,
    order: RwLock<Vec<String>>,
}

impl ActionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            by_id: DashMap::new(),
            order: RwLock::new(Vec::new()),
        }
    }

    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicateAction`] if the id is taken.
    pub fn register(&self, action: CompiledAction) -> Result<(), RegistryError> {
        let id = action.id.clone();
        match self.by_id.entry(id.clone()) {
            Entry::Occupied(_) => return Err(RegistryError::DuplicateAction { id }),
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(action));
            }
        }
        // Shard lock is released before the order lock is taken.
        self.order.write().push(id);
        Ok(())
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<CompiledAction>> {
        self.by_id.get(id).map(|entry| entry.value().clone())
    }

    /// Every action, in registration order.
    #[must_use]
    pub fn all(&self) -> Vec<Arc<CompiledAction>> {
        self.order.read().iter().filter_map(|id| self.get(id)).collect()
    }

    /// Actions compiled from (or declared against) `entity`.
    #[must_use]
    pub fn for_entity(&self, entity: &str) -> Vec<Arc<CompiledAction>> {
        self.all()
            .into_iter()
            .filter(|a| a.entity.as_deref() == Some(entity))
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn clear(&self) {
        let mut order = self.order.write();
        self.by_id.clear();
        order.clear();
    }
}

impl Default for ActionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// EntityRegistry
// ---------------------------------------------------------------------------

/// Declarations known to the running application.
pub struct EntityRegistry {
    by_name: DashMap<String, Arc<EntityDeclaration>>,
    order: RwLock<Vec<String>>,
}

impl EntityRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            by_name: DashMap::new(),
            order: RwLock::new(Vec::new()),
        }
    }

    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicateEntity`] if the name is taken.
    pub fn register(&self, entity: EntityDeclaration) -> Result<(), RegistryError> {
        let name = entity.name.clone();
        match self.by_name.entry(name.clone()) {
            Entry::Occupied(_) => return Err(RegistryError::DuplicateEntity { name }),
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(entity));
            }
        }
        self.order.write().push(name);
        Ok(())
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<EntityDeclaration>> {
        self.by_name.get(name).map(|entry| entry.value().clone())
    }

    #[must_use]
    pub fn all(&self) -> Vec<Arc<EntityDeclaration>> {
        self.order.read().iter().filter_map(|n| self.get(n)).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    pub fn clear(&self) {
        let mut order = self.order.write();
        self.by_name.clear();
        order.clear();
    }
}

impl Default for EntityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
