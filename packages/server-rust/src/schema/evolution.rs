//! Schema Evolution Engine.
//!
//! Reconciles live tables with entity declarations through a
//! [`SchemaCatalog`]. Only additive changes and safe widenings are ever
//! applied; everything else becomes a [`SchemaWarning`]. A failure on one
//! entity is reported and the pass moves on to the next entity.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use stencil_core::naming::is_valid_identifier;
use stencil_core::{ColumnKind, EntityDeclaration, TableLayout};
use tracing::{debug, info, warn};

use super::classify::{classify, TypeChange};
use super::ddl::{ColumnDef, SchemaChange};
use crate::traits::SchemaCatalog;

// ---------------------------------------------------------------------------
// Warnings and plans
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaWarning {
    /// A required column was added to an existing table as nullable.
    NullableRelaxed { table: String, column: String },
    /// Live type differs and converting it could lose data.
    UnsafeTypeChange {
        table: String,
        column: String,
        from: ColumnKind,
        to: ColumnKind,
    },
    /// Live column with no counterpart in the declaration. Left in place.
    OrphanColumn { table: String, column: String },
    /// A declared default could not be rendered and was omitted.
    RejectedDefault {
        table: String,
        column: String,
        reason: String,
    },
    /// A table or column name failed the identifier rule; the entity is skipped.
    InvalidIdentifier { entity: String, identifier: String },
    /// Reading the catalog or applying a change failed.
    Failed { entity: String, reason: String },
}

impl fmt::Display for SchemaWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NullableRelaxed { table, column } => write!(
                f,
                "{table}.{column} is required but was added as nullable to keep existing rows valid"
            ),
            Self::UnsafeTypeChange {
                table,
                column,
                from,
                to,
            } => write!(
                f,
                "{table}.{column} is {} but {} is declared; manual migration required",
                from.sql(),
                to.sql()
            ),
            Self::OrphanColumn { table, column } => {
                write!(f, "{table}.{column} is not declared; left in place")
            }
            Self::RejectedDefault {
                table,
                column,
                reason,
            } => write!(f, "{table}.{column} default omitted: {reason}"),
            Self::InvalidIdentifier { entity, identifier } => {
                write!(f, "entity {entity} skipped: `{identifier}` is not a valid identifier")
            }
            Self::Failed { entity, reason } => write!(f, "entity {entity} failed: {reason}"),
        }
    }
}

/// Changes and warnings computed for one entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityPlan {
    pub entity: String,
    pub table: String,
    pub changes: Vec<SchemaChange>,
    pub warnings: Vec<SchemaWarning>,
}

impl EntityPlan {
    fn new(entity: &EntityDeclaration, table: String) -> Self {
        Self {
            entity: entity.name.clone(),
            table,
            changes: Vec::new(),
            warnings: Vec::new(),
        }
    }

    fn warn(&mut self, warning: SchemaWarning) {
        warn!(entity = %self.entity, table = %self.table, "{warning}");
        self.warnings.push(warning);
    }

    /// Rendered statements, skipping any that fail to render.
    #[must_use]
    pub fn statements(&self) -> Vec<String> {
        self.changes.iter().filter_map(|c| c.to_sql().ok()).collect()
    }

    /// Whether the table may not match the declaration: the entity was
    /// skipped or a change could not be applied.
    #[must_use]
    pub fn is_blocked(&self) -> bool {
        self.warnings.iter().any(|w| {
            matches!(
                w,
                SchemaWarning::InvalidIdentifier { .. } | SchemaWarning::Failed { .. }
            )
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub plans: Vec<EntityPlan>,
    /// Number of changes applied to the live schema.
    pub applied: usize,
}

impl ReconcileReport {
    pub fn warnings(&self) -> impl Iterator<Item = &SchemaWarning> {
        self.plans.iter().flat_map(|p| p.warnings.iter())
    }

    #[must_use]
    pub fn is_blocked(&self, entity: &str) -> bool {
        self.plans.iter().any(|p| p.entity == entity && p.is_blocked())
    }
}

// ---------------------------------------------------------------------------
// SchemaEvolution
// ---------------------------------------------------------------------------

pub struct SchemaEvolution {
    catalog: Arc<dyn SchemaCatalog>,
}

impl SchemaEvolution {
    #[must_use]
    pub fn new(catalog: Arc<dyn SchemaCatalog>) -> Self {
        Self { catalog }
    }

    /// Computes the changes for every entity without applying anything.
    pub async fn plan(&self, entities: &[EntityDeclaration]) -> Vec<EntityPlan> {
        let mut plans = Vec::with_capacity(entities.len());
        for entity in entities {
            plans.push(self.plan_entity(entity).await);
        }
        plans
    }

    /// Plans and applies, one entity at a time.
    ///
    /// Never fails: per-entity errors are recorded as
    /// [`SchemaWarning::Failed`] and the pass continues.
    pub async fn reconcile(&self, entities: &[EntityDeclaration]) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        for entity in entities {
            let mut plan = self.plan_entity(entity).await;
            for change in &plan.changes {
                debug!(entity = %entity.name, sql = ?change.to_sql().ok(), "applying schema change");
                if let Err(err) = self.catalog.apply(change).await {
                    plan.warn(SchemaWarning::Failed {
                        entity: entity.name.clone(),
                        reason: format!("{err:#}"),
                    });
                    break;
                }
                report.applied += 1;
            }
            report.plans.push(plan);
        }
        info!(
            entities = entities.len(),
            applied = report.applied,
            warnings = report.warnings().count(),
            "schema reconciliation finished"
        );
        report
    }

    /// Plan for a single entity.
    pub async fn plan_entity(&self, entity: &EntityDeclaration) -> EntityPlan {
        let layout = TableLayout::for_entity(entity);
        let mut plan = EntityPlan::new(entity, layout.table.clone());

        let bad = std::iter::once(layout.table.as_str())
            .chain(layout.columns.iter().map(|c| c.name.as_str()))
            .find(|name| !is_valid_identifier(name));
        if let Some(identifier) = bad {
            plan.warn(SchemaWarning::InvalidIdentifier {
                entity: entity.name.clone(),
                identifier: identifier.to_string(),
            });
            return plan;
        }

        if let Err(err) = self.diff(entity, &layout, &mut plan).await {
            plan.warn(SchemaWarning::Failed {
                entity: entity.name.clone(),
                reason: format!("{err:#}"),
            });
        }
        plan
    }

    async fn diff(
        &self,
        entity: &EntityDeclaration,
        layout: &TableLayout,
        plan: &mut EntityPlan,
    ) -> anyhow::Result<()> {
        let table = &layout.table;
        let definitions: Vec<ColumnDef> = layout
            .columns
            .iter()
            .map(|spec| {
                let options = entity
                    .find_field(&spec.api_name)
                    .map_or(&[][..], |f| f.options.as_slice());
                let (def, rejected) = ColumnDef::from_spec(spec, options);
                if let Some(err) = rejected {
                    plan.warn(SchemaWarning::RejectedDefault {
                        table: table.clone(),
                        column: spec.name.clone(),
                        reason: err.to_string(),
                    });
                }
                def
            })
            .collect();

        if !self.catalog.table_exists(table).await? {
            plan.changes.push(SchemaChange::CreateTable {
                table: table.clone(),
                columns: definitions,
            });
            return Ok(());
        }

        let live = self.catalog.columns(table).await?;
        for mut def in definitions {
            let Some(info) = live.iter().find(|c| c.name == def.name) else {
                def.primary_key = false;
                if !def.nullable && def.default.is_none() {
                    def.nullable = true;
                    plan.warn(SchemaWarning::NullableRelaxed {
                        table: table.clone(),
                        column: def.name.clone(),
                    });
                }
                plan.changes.push(SchemaChange::AddColumn {
                    table: table.clone(),
                    column: def,
                });
                continue;
            };

            let existing = ColumnKind::from_column(info);
            match classify(&existing, &def.kind) {
                TypeChange::Same => {}
                TypeChange::Safe => plan.changes.push(SchemaChange::AlterColumnType {
                    table: table.clone(),
                    column: def.name.clone(),
                    from: existing,
                    to: def.kind.clone(),
                }),
                TypeChange::Unsafe => plan.warn(SchemaWarning::UnsafeTypeChange {
                    table: table.clone(),
                    column: def.name.clone(),
                    from: existing,
                    to: def.kind.clone(),
                }),
            }
        }

        let declared: HashSet<&str> = layout.columns.iter().map(|c| c.name.as_str()).collect();
        for info in &live {
            if !declared.contains(info.name.as_str()) {
                plan.warn(SchemaWarning::OrphanColumn {
                    table: table.clone(),
                    column: info.name.clone(),
                });
            }
        }
        Ok(())
    }
}
