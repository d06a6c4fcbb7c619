//! Integration tests for the repair flow against on-disk databases.

use std::fs;
use std::path::PathBuf;

use schemafix_core::error::{Error, Result};
use schemafix_core::migration::{
    restore_backup, DefectPattern, FailureCategory, IntegrityScope, MigrationConfig,
    MigrationError, MigrationRecipe, MigrationRunner, ObjectAction, Outcome, RebuildPhase,
    RowFilter, RunPhase, SchemaChange, SchemaInspector,
};
use schemafix_core::store::{
    ConsistencyStatus, ObjectKind, ReferentialViolation, RelationalStore, RowCallback,
    SchemaObject, SqliteStore, StoreConfig,
};
use schemafix_core::ReferentialAction;

struct TestContext {
    db_path: PathBuf,
    backup_dir: PathBuf,
    _dir: tempfile::TempDir,
}

impl TestContext {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        Self {
            db_path: dir.path().join("app.db"),
            backup_dir: dir.path().join("backups"),
            _dir: dir,
        }
    }

    fn open(&self) -> SqliteStore {
        SqliteStore::open(&StoreConfig::new(&self.db_path).create_if_missing()).unwrap()
    }

    fn config(&self) -> MigrationConfig {
        MigrationConfig::default().with_backup_dir(&self.backup_dir)
    }

    fn backups(&self) -> Vec<PathBuf> {
        match fs::read_dir(&self.backup_dir) {
            Ok(entries) => entries.map(|e| e.unwrap().path()).collect(),
            Err(_) => Vec::new(),
        }
    }
}

/// Ten role rows, two of which point at users only present in the legacy table.
fn seed_user_roles(store: &SqliteStore) {
    store
        .execute_script(
            "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL);
             CREATE TABLE users_legacy_backup (id INTEGER PRIMARY KEY, name TEXT NOT NULL);
             CREATE TABLE role_audit (id INTEGER PRIMARY KEY, user_id INTEGER);
             CREATE TABLE user_roles (
                 id INTEGER PRIMARY KEY,
                 user_id INTEGER NOT NULL REFERENCES users_legacy_backup(id) ON DELETE CASCADE,
                 role TEXT NOT NULL DEFAULT 'viewer'
             );
             CREATE INDEX idx_user_roles_user ON user_roles (user_id);
             CREATE VIEW user_role_names AS
                 SELECT u.name, r.role FROM user_roles r JOIN users_legacy_backup u ON u.id = r.user_id;
             CREATE TRIGGER trg_user_roles_audit AFTER INSERT ON user_roles
             BEGIN
                 INSERT INTO role_audit (user_id) VALUES (NEW.user_id);
             END;",
        )
        .unwrap();
    for id in 1..=10 {
        if id <= 8 {
            store
                .execute(&format!("INSERT INTO users (id, name) VALUES ({id}, 'user{id}')"))
                .unwrap();
        }
        store
            .execute(&format!(
                "INSERT INTO users_legacy_backup (id, name) VALUES ({id}, 'user{id}')"
            ))
            .unwrap();
        store
            .execute(&format!(
                "INSERT INTO user_roles (id, user_id, role) VALUES ({id}, {id}, 'role{id}')"
            ))
            .unwrap();
    }
}

fn fix_user_roles() -> MigrationRecipe {
    MigrationRecipe::new(
        "fix-user-roles-fk",
        "user_roles",
        DefectPattern::foreign_key_targets("users_legacy_backup"),
    )
    .with_change(SchemaChange::retarget_foreign_key("users_legacy_backup", "users"))
    .with_row_filter(RowFilter::reference_exists("user_id", "users", "id"))
    .with_rewrite("users_legacy_backup", "users")
}

fn table_sql(store: &dyn RelationalStore, table: &str) -> Option<String> {
    store
        .schema_object(ObjectKind::Table, table)
        .unwrap()
        .and_then(|o| o.sql)
}

/// Wraps a store and fails statements containing `needle`.
struct FaultyStore {
    inner: SqliteStore,
    needle: String,
    /// Run the statement before failing, to simulate a failure mid-way.
    after_execute: bool,
}

impl FaultyStore {
    fn new(inner: SqliteStore, needle: &str) -> Self {
        Self {
            inner,
            needle: needle.to_string(),
            after_execute: false,
        }
    }

    fn after_execute(mut self) -> Self {
        self.after_execute = true;
        self
    }

    fn trips(&self, statement: &str) -> bool {
        statement.contains(&self.needle)
    }
}

impl RelationalStore for FaultyStore {
    fn execute(&self, statement: &str) -> Result<usize> {
        if self.trips(statement) {
            if self.after_execute {
                self.inner.execute(statement)?;
            }
            return Err(Error::Transaction(format!("injected fault: {}", statement)));
        }
        self.inner.execute(statement)
    }

    fn execute_script(&self, script: &str) -> Result<()> {
        if self.trips(script) {
            return Err(Error::Transaction("injected fault".to_string()));
        }
        self.inner.execute_script(script)
    }

    fn query_each(&self, statement: &str, on_row: &mut RowCallback<'_>) -> Result<()> {
        self.inner.query_each(statement, on_row)
    }

    fn begin_transaction(&self) -> Result<()> {
        self.inner.begin_transaction()
    }

    fn commit(&self) -> Result<()> {
        self.inner.commit()
    }

    fn rollback(&self) -> Result<()> {
        self.inner.rollback()
    }

    fn in_transaction(&self) -> bool {
        self.inner.in_transaction()
    }

    fn schema_object(&self, kind: ObjectKind, name: &str) -> Result<Option<SchemaObject>> {
        self.inner.schema_object(kind, name)
    }

    fn schema_objects(&self) -> Result<Vec<SchemaObject>> {
        self.inner.schema_objects()
    }

    fn foreign_keys_enabled(&self) -> Result<bool> {
        self.inner.foreign_keys_enabled()
    }

    fn set_foreign_keys(&self, enabled: bool) -> Result<()> {
        self.inner.set_foreign_keys(enabled)
    }

    fn check_consistency(&self) -> Result<ConsistencyStatus> {
        self.inner.check_consistency()
    }

    fn check_referential_integrity(&self, table: Option<&str>) -> Result<Vec<ReferentialViolation>> {
        self.inner.check_referential_integrity(table)
    }
}

#[test]
fn test_orphan_rows_are_excluded_and_counted() {
    let ctx = TestContext::new();
    let store = ctx.open();
    seed_user_roles(&store);

    let report = MigrationRunner::new(&store, ctx.config()).run(&fix_user_roles());

    assert_eq!(report.outcome, Outcome::Succeeded, "{:?}", report.failure);
    assert_eq!(report.rows_copied, 8);
    let excluded = report.excluded.as_ref().unwrap();
    assert_eq!(excluded.count, 2);
    assert_eq!(
        excluded.reason.as_deref(),
        Some("user_id references a missing users.id")
    );
    assert!(report.warnings.is_empty(), "{:?}", report.warnings);

    let integrity = report.integrity.as_ref().unwrap();
    assert!(integrity.is_ok());
    assert!(integrity.violations.is_empty());
    assert_eq!(store.count_rows("user_roles").unwrap(), 8);
    assert!(store.check_referential_integrity(Some("user_roles")).unwrap().is_empty());

    assert_eq!(
        report.state.phases(),
        vec![
            RunPhase::Detecting,
            RunPhase::Needed,
            RunPhase::BackingUp,
            RunPhase::RebuildingSchema,
            RunPhase::RestoringDependents,
            RunPhase::Validating,
            RunPhase::Succeeded,
        ]
    );
}

#[test]
fn test_rerun_is_not_needed_and_writes_nothing() {
    let ctx = TestContext::new();
    let store = ctx.open();
    seed_user_roles(&store);

    let first = MigrationRunner::new(&store, ctx.config()).run(&fix_user_roles());
    assert_eq!(first.outcome, Outcome::Succeeded);
    let backups = ctx.backups();
    assert_eq!(backups.len(), 1);

    let before = fs::read(&ctx.db_path).unwrap();
    for _ in 0..2 {
        let again = MigrationRunner::new(&store, ctx.config()).run(&fix_user_roles());
        assert_eq!(again.outcome, Outcome::NotNeeded);
        assert!(again.backup.is_none());
        assert_eq!(again.rows_copied, 0);
    }
    assert_eq!(fs::read(&ctx.db_path).unwrap(), before);
    assert_eq!(ctx.backups(), backups);
}

#[test]
fn test_dependents_survive_with_rewritten_definitions() {
    let ctx = TestContext::new();
    let store = ctx.open();
    seed_user_roles(&store);

    let report = MigrationRunner::new(&store, ctx.config()).run(&fix_user_roles());
    assert_eq!(report.outcome, Outcome::Succeeded);

    let rebuild = report.rebuild.as_ref().unwrap();
    let dropped: Vec<&str> = rebuild.dependents_dropped.iter().map(|o| o.name.as_str()).collect();
    assert_eq!(dropped, vec!["user_role_names", "trg_user_roles_audit"]);
    assert!(report
        .dependents_restored
        .iter()
        .all(|o| o.action == ObjectAction::Restored));
    assert!(report.issues.is_empty());

    let view = store
        .schema_object(ObjectKind::View, "user_role_names")
        .unwrap()
        .unwrap()
        .sql
        .unwrap();
    assert!(view.contains("JOIN users u"));
    assert!(!view.contains("users_legacy_backup"));
    assert_eq!(store.count_rows("user_role_names").unwrap(), 8);

    assert!(store
        .schema_object(ObjectKind::Trigger, "trg_user_roles_audit")
        .unwrap()
        .is_some());
    assert!(store
        .schema_object(ObjectKind::Index, "idx_user_roles_user")
        .unwrap()
        .is_some());

    let def = SchemaInspector::new(&store).inspect("user_roles").unwrap().unwrap();
    let fk = &def.foreign_keys[0];
    assert_eq!(fk.references_table, "users");
    assert_eq!(fk.on_delete, Some(ReferentialAction::Cascade));
    assert_eq!(def.column("role").unwrap().default.as_deref(), Some("'viewer'"));

    store
        .execute("INSERT INTO user_roles (user_id) VALUES (1)")
        .unwrap();
    assert_eq!(store.count_rows("role_audit").unwrap(), 11);
    assert!(store
        .execute("INSERT INTO user_roles (user_id) VALUES (9)")
        .is_err());
}

#[test]
fn test_failure_after_backup_leaves_original_untouched() {
    let ctx = TestContext::new();
    let inner = ctx.open();
    seed_user_roles(&inner);
    let definition = table_sql(&inner, "user_roles");
    let store = FaultyStore::new(inner, "ALTER TABLE");

    let report = MigrationRunner::new(&store, ctx.config()).run(&fix_user_roles());

    assert_eq!(report.outcome, Outcome::Failed);
    let failure = report.failure.as_ref().unwrap();
    assert_eq!(failure.category, FailureCategory::RebuildFailed);
    assert!(failure.message.contains("atomic_swap"), "{}", failure.message);
    assert_eq!(report.state.last_active_phase(), RunPhase::RebuildingSchema);

    let backup = report.backup.as_ref().unwrap();
    assert_eq!(backup.row_count, 10);
    assert!(backup.path.exists());

    assert_eq!(table_sql(&store, "user_roles"), definition);
    assert_eq!(store.count_rows("user_roles").unwrap(), 10);
    assert!(!store.table_exists("user_roles_new").unwrap());
    assert!(store
        .schema_object(ObjectKind::View, "user_role_names")
        .unwrap()
        .is_some());
    assert!(store.foreign_keys_enabled().unwrap());
}

#[test]
fn test_failure_mid_copy_leaves_no_shadow_table() {
    let ctx = TestContext::new();
    let inner = ctx.open();
    seed_user_roles(&inner);
    let store = FaultyStore::new(inner, "INSERT OR IGNORE INTO \"user_roles_new\"").after_execute();

    let report = MigrationRunner::new(&store, ctx.config()).run(&fix_user_roles());

    assert_eq!(report.outcome, Outcome::Failed);
    assert!(report
        .failure
        .as_ref()
        .unwrap()
        .message
        .contains(&RebuildPhase::FilteredCopy.to_string()));
    assert!(!store.table_exists("user_roles_new").unwrap());
    assert_eq!(store.count_rows("user_roles").unwrap(), 10);
    assert!(SchemaInspector::new(&store)
        .detect("user_roles", &DefectPattern::foreign_key_targets("users_legacy_backup"))
        .unwrap()
        .is_defective());
}

#[test]
fn test_backup_failure_aborts_before_any_change() {
    let ctx = TestContext::new();
    let store = ctx.open();
    seed_user_roles(&store);
    fs::write(&ctx.backup_dir, "not a directory").unwrap();
    let definition = table_sql(&store, "user_roles");

    let report = MigrationRunner::new(&store, ctx.config()).run(&fix_user_roles());

    assert_eq!(report.outcome, Outcome::Failed);
    assert_eq!(
        report.failure.as_ref().unwrap().category,
        FailureCategory::BackupFailed
    );
    assert_eq!(report.state.last_active_phase(), RunPhase::BackingUp);
    assert!(report.rebuild.is_none());
    assert_eq!(table_sql(&store, "user_roles"), definition);
    assert_eq!(store.count_rows("user_roles").unwrap(), 10);
}

#[test]
fn test_missing_parent_table_is_a_precondition_failure() {
    let ctx = TestContext::new();
    let store = ctx.open();
    store
        .execute_script(
            "CREATE TABLE users_legacy_backup (id INTEGER PRIMARY KEY);
             CREATE TABLE user_roles (id INTEGER PRIMARY KEY, user_id INTEGER REFERENCES users_legacy_backup(id));",
        )
        .unwrap();

    let report = MigrationRunner::new(&store, ctx.config()).run(&fix_user_roles());

    assert_eq!(report.outcome, Outcome::Failed);
    let failure = report.failure.unwrap();
    assert_eq!(failure.category, FailureCategory::PreconditionFailed);
    assert_eq!(failure.entity.as_deref(), Some("users"));
    assert!(ctx.backups().is_empty());
}

#[test]
fn test_dependent_restore_failure_is_reported_not_fatal() {
    let ctx = TestContext::new();
    let inner = ctx.open();
    seed_user_roles(&inner);
    let store = FaultyStore::new(inner, "CREATE VIEW user_role_names");

    let report = MigrationRunner::new(&store, ctx.config()).run(&fix_user_roles());

    assert_eq!(report.outcome, Outcome::Succeeded);
    assert_eq!(report.issues.len(), 1);
    assert_eq!(report.issues[0].category, FailureCategory::DependentRestoreFailed);
    assert_eq!(report.issues[0].entity.as_deref(), Some("view user_role_names"));
    let failed: Vec<_> = report
        .dependents_restored
        .iter()
        .filter(|o| o.is_failure())
        .collect();
    assert_eq!(failed.len(), 1);
    assert!(store
        .schema_object(ObjectKind::Trigger, "trg_user_roles_audit")
        .unwrap()
        .is_some());
}

#[test]
fn test_unrelated_violation_fails_audit_in_store_scope() {
    let ctx = TestContext::new();
    let store = ctx.open();
    seed_user_roles(&store);
    store
        .execute_script(
            "CREATE TABLE sessions (id INTEGER PRIMARY KEY, user_id INTEGER REFERENCES users(id));",
        )
        .unwrap();
    store.set_foreign_keys(false).unwrap();
    store
        .execute("INSERT INTO sessions (id, user_id) VALUES (1, 404)")
        .unwrap();
    store.set_foreign_keys(true).unwrap();

    let report = MigrationRunner::new(&store, ctx.config()).run(&fix_user_roles());
    assert_eq!(report.outcome, Outcome::Failed);
    assert_eq!(
        report.failure.as_ref().unwrap().category,
        FailureCategory::IntegrityViolation
    );
    assert_eq!(report.integrity.as_ref().unwrap().violations[0].table, "sessions");
    // the rebuild already committed
    assert_eq!(store.count_rows("user_roles").unwrap(), 8);
}

#[test]
fn test_table_scope_ignores_unrelated_violations() {
    let ctx = TestContext::new();
    let store = ctx.open();
    seed_user_roles(&store);
    store
        .execute_script(
            "CREATE TABLE sessions (id INTEGER PRIMARY KEY, user_id INTEGER REFERENCES users(id));",
        )
        .unwrap();
    store.set_foreign_keys(false).unwrap();
    store
        .execute("INSERT INTO sessions (id, user_id) VALUES (1, 404)")
        .unwrap();
    store.set_foreign_keys(true).unwrap();

    let config = ctx.config().with_integrity_scope(IntegrityScope::Table);
    let report = MigrationRunner::new(&store, config).run(&fix_user_roles());
    assert_eq!(report.outcome, Outcome::Succeeded);
}

#[test]
fn test_restore_backup_reverts_migration() {
    let ctx = TestContext::new();
    let store = ctx.open();
    seed_user_roles(&store);
    let original = table_sql(&store, "user_roles");

    let report = MigrationRunner::new(&store, ctx.config()).run(&fix_user_roles());
    assert_eq!(report.outcome, Outcome::Succeeded);
    let path = report.backup.unwrap().path;

    let summary = restore_backup(&store, &path).unwrap();
    assert_eq!(summary.table, "user_roles");
    assert_eq!(summary.rows, 10);
    assert_eq!(table_sql(&store, "user_roles"), original);
    assert!(store
        .schema_object(ObjectKind::Index, "idx_user_roles_user")
        .unwrap()
        .is_some());

    let rerun = MigrationRunner::new(&store, ctx.config()).run(&fix_user_roles());
    assert_eq!(rerun.outcome, Outcome::Succeeded);
    assert_eq!(rerun.rows_copied, 8);
}

#[test]
fn test_drop_denormalized_columns() {
    let ctx = TestContext::new();
    let store = ctx.open();
    store
        .execute_script(
            "CREATE TABLE app_environment_country_mappings (id INTEGER PRIMARY KEY);
             CREATE TABLE application_endpoints (
                 id INTEGER PRIMARY KEY,
                 mapping_id INTEGER REFERENCES app_environment_country_mappings(id),
                 application_id INTEGER,
                 environment_id INTEGER,
                 country_id INTEGER,
                 url TEXT NOT NULL,
                 UNIQUE (application_id, url)
             );
             CREATE INDEX idx_endpoints_app ON application_endpoints (application_id);
             CREATE INDEX idx_endpoints_mapping ON application_endpoints (mapping_id);
             INSERT INTO app_environment_country_mappings (id) VALUES (1), (2);
             INSERT INTO application_endpoints (id, mapping_id, application_id, url) VALUES
                 (1, 1, 10, 'https://a'), (2, 2, 10, 'https://b'), (3, NULL, 11, 'https://c');",
        )
        .unwrap();

    let recipe = MigrationRecipe::new(
        "clean-endpoints-structure",
        "application_endpoints",
        DefectPattern::has_columns(["application_id", "environment_id", "country_id"]),
    )
    .with_change(SchemaChange::drop_columns([
        "application_id",
        "environment_id",
        "country_id",
    ]))
    .with_row_filter(RowFilter::not_null("mapping_id"));

    let report = MigrationRunner::new(&store, ctx.config()).run(&recipe);
    assert_eq!(report.outcome, Outcome::Succeeded, "{:?}", report.failure);
    assert_eq!(report.rows_copied, 2);
    assert_eq!(report.excluded.as_ref().unwrap().count, 1);
    assert_eq!(
        report.rebuild.as_ref().unwrap().indexes_skipped,
        vec!["idx_endpoints_app"]
    );

    let def = SchemaInspector::new(&store)
        .inspect("application_endpoints")
        .unwrap()
        .unwrap();
    assert_eq!(def.column_names(), vec!["id", "mapping_id", "url"]);
    assert!(def.unique_constraints.is_empty());
    assert!(store
        .schema_object(ObjectKind::Index, "idx_endpoints_app")
        .unwrap()
        .is_none());
    assert!(store
        .schema_object(ObjectKind::Index, "idx_endpoints_mapping")
        .unwrap()
        .is_some());

    let again = MigrationRunner::new(&store, ctx.config()).run(&recipe);
    assert_eq!(again.outcome, Outcome::NotNeeded);
}

#[test]
fn test_migration_error_categories() {
    let err = MigrationError::BackupFailed {
        table: "user_roles".to_string(),
        reason: "disk full".to_string(),
    };
    assert_eq!(err.category(), FailureCategory::BackupFailed);
    assert_eq!(err.entity().as_deref(), Some("user_roles"));
}
