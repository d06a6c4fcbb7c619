//! Transactional shadow-table rebuild.
//!
//! The corrected table is created under a temporary name, filled from the
//! original with filtered rows, and swapped in by dropping the original and
//! renaming the shadow. Dependents are dropped and the table's indexes
//! recreated in the same transaction, so a failure at any point rolls back
//! to the untouched original.

use serde::Serialize;
use tracing::{debug, info, warn};

use super::dependents::{DependentObjectRepairer, ObjectOutcome};
use super::error::MigrationError;
use super::plan::{ConflictPolicy, MigrationPlan};
use crate::catalog::quote_ident;
use crate::error::Error;
use crate::store::RelationalStore;

/// Default suffix for shadow tables.
pub const DEFAULT_SHADOW_SUFFIX: &str = "_new";

/// Step of the rebuild transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RebuildPhase {
    Begin,
    DropDependents,
    ShadowCreate,
    FilteredCopy,
    AtomicSwap,
    Reindex,
    Commit,
}

impl std::fmt::Display for RebuildPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RebuildPhase::Begin => write!(f, "begin"),
            RebuildPhase::DropDependents => write!(f, "drop_dependents"),
            RebuildPhase::ShadowCreate => write!(f, "shadow_create"),
            RebuildPhase::FilteredCopy => write!(f, "filtered_copy"),
            RebuildPhase::AtomicSwap => write!(f, "atomic_swap"),
            RebuildPhase::Reindex => write!(f, "reindex"),
            RebuildPhase::Commit => write!(f, "commit"),
        }
    }
}

/// Row accounting and side effects of a committed rebuild.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RebuildOutcome {
    pub shadow_table: String,
    /// Rows in the original table.
    pub original_rows: u64,
    /// Rows admitted by the row filter.
    pub eligible_rows: u64,
    /// Rows in the rebuilt table.
    pub copied_rows: u64,
    /// `original_rows - copied_rows`.
    pub excluded_rows: u64,
    /// Why rows were excluded, when any were.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exclusion_reason: Option<String>,
    /// Per-object outcome of dropping dependents.
    pub dependents_dropped: Vec<ObjectOutcome>,
    pub indexes_recreated: usize,
    /// Indexes not recreated because they cover removed columns.
    pub indexes_skipped: Vec<String>,
    pub warnings: Vec<String>,
}

/// Executes a [`MigrationPlan`] as a single transaction.
pub struct TableRebuilder<'a> {
    store: &'a dyn RelationalStore,
    shadow_suffix: String,
}

impl<'a> TableRebuilder<'a> {
    pub fn new(store: &'a dyn RelationalStore, shadow_suffix: impl Into<String>) -> Self {
        Self {
            store,
            shadow_suffix: shadow_suffix.into(),
        }
    }

    /// Temporary name for the corrected table.
    pub fn shadow_name(&self, table: &str) -> String {
        format!("{}{}", table, self.shadow_suffix)
    }

    /// Rebuild the plan's table.
    ///
    /// Referential enforcement is switched off for the duration and restored
    /// to its previous setting afterwards, whatever the result. On failure
    /// the transaction is rolled back and the error names the phase that
    /// failed.
    pub fn rebuild(&self, plan: &MigrationPlan) -> Result<RebuildOutcome, MigrationError> {
        let shadow = self.shadow_name(&plan.table);
        if shadow.eq_ignore_ascii_case(&plan.table) {
            return Err(MigrationError::InvalidPlan {
                target: plan.recipe.clone(),
                reason: "shadow table name equals the table name".to_string(),
            });
        }

        let enforced = self.store.foreign_keys_enabled()?;
        if enforced {
            self.store.set_foreign_keys(false)?;
        }

        let mut phase = RebuildPhase::Begin;
        let result = self.run_transaction(plan, &shadow, &mut phase);

        let mut result = match result {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                if self.store.in_transaction() {
                    if let Err(rollback) = self.store.rollback() {
                        warn!(table = %plan.table, error = %rollback, "rollback failed");
                    }
                }
                warn!(table = %plan.table, %phase, error = %e, "rebuild rolled back");
                Err(MigrationError::RebuildFailed {
                    table: plan.table.clone(),
                    phase,
                    message: e.to_string(),
                })
            }
        };

        if enforced {
            if let Err(e) = self.store.set_foreign_keys(true) {
                warn!(error = %e, "could not re-enable foreign key enforcement");
                if let Ok(outcome) = result.as_mut() {
                    outcome
                        .warnings
                        .push(format!("foreign key enforcement not re-enabled: {}", e));
                }
            }
        }

        result
    }

    fn run_transaction(
        &self,
        plan: &MigrationPlan,
        shadow: &str,
        phase: &mut RebuildPhase,
    ) -> Result<RebuildOutcome, MigrationError> {
        let store = self.store;
        let table = plan.table.as_str();
        let mut outcome = RebuildOutcome {
            shadow_table: shadow.to_string(),
            indexes_skipped: plan.skipped_indexes.clone(),
            ..RebuildOutcome::default()
        };

        store.begin_transaction()?;

        *phase = RebuildPhase::DropDependents;
        outcome.dependents_dropped = DependentObjectRepairer::new(store).drop_all(&plan.dependents)?;

        *phase = RebuildPhase::ShadowCreate;
        store.execute(&format!("DROP TABLE IF EXISTS {}", quote_ident(shadow)))?;
        store.execute(&plan.target.to_create_sql_named(shadow))?;
        debug!(table, shadow, "created shadow table");

        *phase = RebuildPhase::FilteredCopy;
        outcome.original_rows = store.count_rows(table)?;
        outcome.eligible_rows = non_negative(store.query_i64(&plan.eligible_count_statement())?);
        let inserted = store.execute(&plan.copy_statement(shadow))? as u64;
        outcome.copied_rows = inserted;
        outcome.excluded_rows = outcome.original_rows.saturating_sub(inserted);

        let filtered = outcome.original_rows.saturating_sub(outcome.eligible_rows);
        if filtered > 0 {
            let reason = plan.row_filter.describe();
            warn!(table, excluded = filtered, reason = %reason, "rows excluded by filter");
            outcome.exclusion_reason = Some(reason);
        }
        if inserted < outcome.eligible_rows {
            let skipped = outcome.eligible_rows - inserted;
            let message = format!(
                "{} eligible row(s) skipped on constraint conflict ({})",
                skipped,
                ConflictPolicy::Ignore
            );
            warn!(table, skipped, "rows skipped during copy");
            outcome.exclusion_reason = Some(match outcome.exclusion_reason.take() {
                Some(reason) => format!("{}; {}", reason, message),
                None => message.clone(),
            });
            outcome.warnings.push(message);
        }

        *phase = RebuildPhase::AtomicSwap;
        store.execute(&format!("DROP TABLE {}", quote_ident(table)))?;
        store.execute(&format!(
            "ALTER TABLE {} RENAME TO {}",
            quote_ident(shadow),
            quote_ident(table)
        ))?;
        let swapped = store.count_rows(table)?;
        if swapped != inserted {
            return Err(Error::InvalidData(format!(
                "rebuilt table has {} row(s), expected {}",
                swapped, inserted
            ))
            .into());
        }

        *phase = RebuildPhase::Reindex;
        for index in &plan.indexes {
            store.execute(&index.sql)?;
            outcome.indexes_recreated += 1;
        }

        *phase = RebuildPhase::Commit;
        store.commit()?;

        info!(
            table,
            copied = outcome.copied_rows,
            excluded = outcome.excluded_rows,
            indexes = outcome.indexes_recreated,
            "table rebuilt"
        );
        Ok(outcome)
    }
}

fn non_negative(count: i64) -> u64 {
    count.max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CheckConstraint;
    use crate::migration::change::SchemaChange;
    use crate::migration::filter::RowFilter;
    use crate::migration::inspector::SchemaInspector;
    use crate::migration::pattern::DefectPattern;
    use crate::migration::plan::MigrationRecipe;
    use crate::store::{ObjectKind, SqliteStore};

    fn store() -> SqliteStore {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .execute_script(
                "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT);
                 CREATE TABLE users_legacy_backup (id INTEGER PRIMARY KEY, name TEXT);
                 CREATE TABLE user_roles (
                     id INTEGER PRIMARY KEY,
                     user_id INTEGER REFERENCES users_legacy_backup(id),
                     role TEXT NOT NULL
                 );
                 CREATE INDEX idx_user_roles_user ON user_roles (user_id);
                 CREATE VIEW role_names AS SELECT role FROM user_roles;
                 INSERT INTO users (id, name) VALUES (1, 'ada'), (2, 'grace');
                 INSERT INTO users_legacy_backup (id, name) VALUES (1, 'ada'), (2, 'grace'), (3, 'old');",
            )
            .unwrap();
        store.set_foreign_keys(false).unwrap();
        store
            .execute_script(
                "INSERT INTO user_roles (id, user_id, role) VALUES
                     (1, 1, 'admin'), (2, 2, 'viewer'), (3, 3, 'viewer'), (4, NULL, '');",
            )
            .unwrap();
        store.set_foreign_keys(true).unwrap();
        store
    }

    fn recipe() -> MigrationRecipe {
        MigrationRecipe::new(
            "fix-user-roles-fk",
            "user_roles",
            DefectPattern::foreign_key_targets("users_legacy_backup"),
        )
        .with_change(SchemaChange::retarget_foreign_key("users_legacy_backup", "users"))
        .with_row_filter(RowFilter::reference_exists("user_id", "users", "id"))
    }

    fn plan(store: &SqliteStore, recipe: &MigrationRecipe, policy: ConflictPolicy) -> MigrationPlan {
        let inspector = SchemaInspector::new(store);
        let source = inspector.inspect("user_roles").unwrap().unwrap();
        let dependents = DependentObjectRepairer::new(store)
            .find_dependents("user_roles", recipe.retired_names().as_slice())
            .unwrap();
        let indexes = inspector.indexes("user_roles").unwrap();
        MigrationPlan::derive(recipe, &source, dependents, indexes, policy)
            .unwrap()
            .unwrap()
    }

    #[test]
    fn test_rebuild_swaps_and_filters() {
        let store = store();
        let plan = plan(&store, &recipe(), ConflictPolicy::Ignore);
        let outcome = TableRebuilder::new(&store, DEFAULT_SHADOW_SUFFIX)
            .rebuild(&plan)
            .unwrap();

        assert_eq!(outcome.original_rows, 4);
        assert_eq!(outcome.eligible_rows, 3);
        assert_eq!(outcome.copied_rows, 3);
        assert_eq!(outcome.excluded_rows, 1);
        assert_eq!(
            outcome.exclusion_reason.as_deref(),
            Some("user_id references a missing users.id")
        );
        assert_eq!(outcome.dependents_dropped.len(), 1);
        assert_eq!(outcome.dependents_dropped[0].name, "role_names");
        assert_eq!(outcome.indexes_recreated, 1);

        let def = SchemaInspector::new(&store).inspect("user_roles").unwrap().unwrap();
        assert_eq!(def.foreign_keys[0].references_table, "users");
        assert!(!store.table_exists("user_roles_new").unwrap());
        assert!(store
            .schema_object(ObjectKind::Index, "idx_user_roles_user")
            .unwrap()
            .is_some());
        assert!(store.foreign_keys_enabled().unwrap());
        assert!(store.check_referential_integrity(Some("user_roles")).unwrap().is_empty());
    }

    #[test]
    fn test_conflicting_rows_are_counted_under_ignore() {
        let store = store();
        let recipe = recipe().with_change(SchemaChange::AddCheck {
            check: CheckConstraint::new("role <> ''"),
        });
        let plan = plan(&store, &recipe, ConflictPolicy::Ignore);
        let outcome = TableRebuilder::new(&store, "_shadow").rebuild(&plan).unwrap();

        assert_eq!(outcome.eligible_rows, 3);
        assert_eq!(outcome.copied_rows, 2);
        assert_eq!(outcome.excluded_rows, 2);
        assert_eq!(outcome.warnings.len(), 1);
        assert!(outcome.exclusion_reason.unwrap().contains("constraint conflict"));
    }

    #[test]
    fn test_failure_rolls_back() {
        let store = store();
        let recipe = recipe().with_change(SchemaChange::AddCheck {
            check: CheckConstraint::new("role <> ''"),
        });
        let plan = plan(&store, &recipe, ConflictPolicy::Abort);
        let before = store.schema_object(ObjectKind::Table, "user_roles").unwrap();

        let err = TableRebuilder::new(&store, DEFAULT_SHADOW_SUFFIX)
            .rebuild(&plan)
            .unwrap_err();
        assert!(matches!(
            err,
            MigrationError::RebuildFailed {
                phase: RebuildPhase::FilteredCopy,
                ..
            }
        ));

        assert!(!store.in_transaction());
        assert_eq!(store.schema_object(ObjectKind::Table, "user_roles").unwrap(), before);
        assert_eq!(store.count_rows("user_roles").unwrap(), 4);
        assert!(!store.table_exists("user_roles_new").unwrap());
        assert!(store.schema_object(ObjectKind::View, "role_names").unwrap().is_some());
        assert!(store.foreign_keys_enabled().unwrap());
    }

    #[test]
    fn test_shadow_name() {
        let store = SqliteStore::open_in_memory().unwrap();
        let rebuilder = TableRebuilder::new(&store, "_new");
        assert_eq!(rebuilder.shadow_name("user_roles"), "user_roles_new");
    }
}
