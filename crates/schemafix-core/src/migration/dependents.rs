//! Views, indexes, and triggers that must be dropped around a rebuild.
//!
//! Renaming a table fails while other objects reference names that no
//! longer resolve, so dependents are captured and dropped inside the rebuild
//! transaction and recreated afterwards. Recreation is best-effort: each
//! object is attempted independently and failures are reported, not raised.

use std::collections::HashSet;

use serde::Serialize;
use tracing::{debug, info, warn};

use super::error::MigrationError;
use crate::catalog::{quote_ident, replace_identifier, ParseError};
use crate::store::{ObjectKind, RelationalStore};

/// A captured dependent object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DependentObject {
    pub kind: ObjectKind,
    pub name: String,
    /// Table the object is attached to (the object itself for views).
    pub table_name: String,
    /// Creation statement as captured before the rebuild.
    pub statement: String,
}

/// Identifier substitutions applied to statements before recreation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RewriteRule {
    pub replacements: Vec<(String, String)>,
}

impl RewriteRule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace identifier `from` with `to`.
    pub fn replace(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.replacements.push((from.into(), to.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.replacements.is_empty()
    }

    /// Identifiers this rule retires.
    pub fn sources(&self) -> impl Iterator<Item = &str> {
        self.replacements.iter().map(|(from, _)| from.as_str())
    }

    /// Apply every replacement to `statement`, matching whole identifiers.
    pub fn apply(&self, statement: &str) -> Result<String, ParseError> {
        let mut out = statement.to_string();
        for (from, to) in &self.replacements {
            out = replace_identifier(&out, from, to)?;
        }
        Ok(out)
    }
}

/// What happened to one dependent object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectAction {
    Dropped,
    AlreadyAbsent,
    Restored,
    /// An object with this name already existed; left untouched.
    AlreadyPresent,
    Failed,
}

impl std::fmt::Display for ObjectAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ObjectAction::Dropped => write!(f, "dropped"),
            ObjectAction::AlreadyAbsent => write!(f, "already_absent"),
            ObjectAction::Restored => write!(f, "restored"),
            ObjectAction::AlreadyPresent => write!(f, "already_present"),
            ObjectAction::Failed => write!(f, "failed"),
        }
    }
}

/// Per-object outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectOutcome {
    pub kind: ObjectKind,
    pub name: String,
    pub action: ObjectAction,
    /// Statement executed, after rewriting.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub statement: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ObjectOutcome {
    fn new(object: &DependentObject, action: ObjectAction) -> Self {
        Self {
            kind: object.kind,
            name: object.name.clone(),
            action,
            statement: None,
            error: None,
        }
    }

    pub fn is_failure(&self) -> bool {
        self.action == ObjectAction::Failed
    }

    /// The failure as an error value, for reporting.
    pub fn to_error(&self) -> Option<MigrationError> {
        self.is_failure().then(|| MigrationError::DependentRestoreFailed {
            kind: self.kind,
            name: self.name.clone(),
            reason: self.error.clone().unwrap_or_default(),
        })
    }
}

/// Finds, drops, and recreates objects depending on a table.
pub struct DependentObjectRepairer<'a> {
    store: &'a dyn RelationalStore,
}

impl<'a> DependentObjectRepairer<'a> {
    pub fn new(store: &'a dyn RelationalStore) -> Self {
        Self { store }
    }

    /// Views and triggers referencing `table` or any `retired` name, plus
    /// indexes of other tables that mention them.
    ///
    /// Views found along the way are followed, so a view built on a
    /// dependent view is captured too. The table's own indexes are
    /// excluded; the rebuilder recreates those. Objects are returned in
    /// creation order so views built on views restore cleanly.
    pub fn find_dependents<S: AsRef<str>>(
        &self,
        table: &str,
        retired: &[S],
    ) -> Result<Vec<DependentObject>, MigrationError> {
        let mut pending: Vec<String> = std::iter::once(table.to_string())
            .chain(retired.iter().map(|s| s.as_ref().to_string()))
            .collect();
        let mut scanned: HashSet<String> = HashSet::new();
        let mut found: HashSet<(ObjectKind, String)> = HashSet::new();

        while let Some(name) = pending.pop() {
            if !scanned.insert(name.to_ascii_lowercase()) {
                continue;
            }
            for object in self.store.objects_referencing(&name)? {
                if object.sql.is_none() {
                    continue;
                }
                if object.kind == ObjectKind::Index && object.table_name.eq_ignore_ascii_case(table) {
                    continue;
                }
                let key = (object.kind, object.name.to_ascii_lowercase());
                if found.insert(key) && object.kind == ObjectKind::View {
                    pending.push(object.name);
                }
            }
        }

        let mut dependents = Vec::with_capacity(found.len());
        for object in self.store.schema_objects()? {
            if !found.contains(&(object.kind, object.name.to_ascii_lowercase())) {
                continue;
            }
            let Some(statement) = object.sql else { continue };
            dependents.push(DependentObject {
                kind: object.kind,
                name: object.name,
                table_name: object.table_name,
                statement,
            });
        }

        debug!(table, count = dependents.len(), "found dependent objects");
        Ok(dependents)
    }

    /// Drop each object, tolerating ones already gone. Stops at the first
    /// store error.
    pub fn drop_all(&self, objects: &[DependentObject]) -> Result<Vec<ObjectOutcome>, MigrationError> {
        let mut outcomes = Vec::with_capacity(objects.len());
        for object in objects {
            if self.store.schema_object(object.kind, &object.name)?.is_none() {
                outcomes.push(ObjectOutcome::new(object, ObjectAction::AlreadyAbsent));
                continue;
            }
            let statement = format!(
                "DROP {} IF EXISTS {}",
                object.kind.keyword(),
                quote_ident(&object.name)
            );
            self.store.execute(&statement)?;
            debug!(kind = %object.kind, name = %object.name, "dropped dependent");
            outcomes.push(ObjectOutcome::new(object, ObjectAction::Dropped));
        }
        Ok(outcomes)
    }

    /// Recreate each object, rewriting its statement first.
    ///
    /// Never fails as a whole: an object that cannot be recreated is
    /// reported with [`ObjectAction::Failed`] and the rest still run.
    pub fn restore_all(
        &self,
        objects: &[DependentObject],
        rewrite: Option<&RewriteRule>,
    ) -> Vec<ObjectOutcome> {
        objects
            .iter()
            .map(|object| self.restore_one(object, rewrite))
            .collect()
    }

    fn restore_one(&self, object: &DependentObject, rewrite: Option<&RewriteRule>) -> ObjectOutcome {
        let mut outcome = ObjectOutcome::new(object, ObjectAction::Restored);

        match self.store.schema_object(object.kind, &object.name) {
            Ok(Some(_)) => {
                outcome.action = ObjectAction::AlreadyPresent;
                return outcome;
            }
            Ok(None) => {}
            Err(e) => return failed(outcome, e.to_string()),
        }

        let statement = match rewrite {
            Some(rule) => match rule.apply(&object.statement) {
                Ok(sql) => sql,
                Err(e) => return failed(outcome, e.to_string()),
            },
            None => object.statement.clone(),
        };
        outcome.statement = Some(statement.clone());

        match self.store.execute_script(&statement) {
            Ok(()) => {
                info!(kind = %object.kind, name = %object.name, "restored dependent");
                outcome
            }
            Err(e) => failed(outcome, e.to_string()),
        }
    }
}

fn failed(mut outcome: ObjectOutcome, error: String) -> ObjectOutcome {
    warn!(kind = %outcome.kind, name = %outcome.name, error = %error, "could not restore dependent");
    outcome.action = ObjectAction::Failed;
    outcome.error = Some(error);
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;

    fn store() -> SqliteStore {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .execute_script(
                "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT);
                 CREATE TABLE users_legacy_backup (id INTEGER PRIMARY KEY, name TEXT);
                 CREATE TABLE user_roles (id INTEGER PRIMARY KEY, user_id INTEGER, role TEXT);
                 CREATE TABLE audit (id INTEGER PRIMARY KEY, note TEXT);
                 CREATE INDEX idx_user_roles_role ON user_roles (role);
                 CREATE VIEW role_report AS
                     SELECT u.name, r.role FROM user_roles r JOIN users_legacy_backup u ON u.id = r.user_id;
                 CREATE VIEW legacy_names AS SELECT name FROM users_legacy_backup;
                 CREATE VIEW unrelated AS SELECT 'user_roles' AS label FROM users;
                 CREATE TRIGGER trg_roles AFTER INSERT ON user_roles
                 BEGIN INSERT INTO audit (note) VALUES ('role added'); END;",
            )
            .unwrap();
        store
    }

    #[test]
    fn test_find_dependents() {
        let store = store();
        let repairer = DependentObjectRepairer::new(&store);
        let found = repairer
            .find_dependents("user_roles", &["users_legacy_backup"])
            .unwrap();
        let names: Vec<&str> = found.iter().map(|o| o.name.as_str()).collect();
        assert_eq!(names, vec!["role_report", "legacy_names", "trg_roles"]);
    }

    #[test]
    fn test_find_dependents_follows_view_chains() {
        let store = store();
        store
            .execute_script(
                "CREATE VIEW role_counts AS SELECT role, COUNT(*) AS n FROM user_roles GROUP BY role;
                 CREATE VIEW busy_roles AS SELECT role FROM role_counts WHERE n > 1;
                 CREATE VIEW busiest_role AS SELECT role FROM busy_roles LIMIT 1;",
            )
            .unwrap();
        let repairer = DependentObjectRepairer::new(&store);
        let found = repairer.find_dependents("user_roles", &[] as &[&str]).unwrap();
        let names: Vec<&str> = found.iter().map(|o| o.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["role_report", "trg_roles", "role_counts", "busy_roles", "busiest_role"]
        );
    }

    #[test]
    fn test_drop_then_restore_with_rewrite() {
        let store = store();
        let repairer = DependentObjectRepairer::new(&store);
        let found = repairer
            .find_dependents("user_roles", &["users_legacy_backup"])
            .unwrap();

        let dropped = repairer.drop_all(&found).unwrap();
        assert!(dropped.iter().all(|o| o.action == ObjectAction::Dropped));
        assert!(store.schema_object(ObjectKind::View, "role_report").unwrap().is_none());

        let again = repairer.drop_all(&found).unwrap();
        assert!(again.iter().all(|o| o.action == ObjectAction::AlreadyAbsent));

        let rule = RewriteRule::new().replace("users_legacy_backup", "users");
        let restored = repairer.restore_all(&found, Some(&rule));
        assert!(restored.iter().all(|o| o.action == ObjectAction::Restored));

        let view = store
            .schema_object(ObjectKind::View, "role_report")
            .unwrap()
            .unwrap();
        let sql = view.sql.unwrap();
        assert!(sql.contains("JOIN users u"));
        assert!(!sql.contains("users_legacy_backup"));
    }

    #[test]
    fn test_restore_reports_failures_and_continues() {
        let store = store();
        let repairer = DependentObjectRepairer::new(&store);
        let broken = DependentObject {
            kind: ObjectKind::View,
            name: "broken".to_string(),
            table_name: "broken".to_string(),
            statement: "CREATE VIEW broken AS SELEC name FROM users".to_string(),
        };
        let fine = DependentObject {
            kind: ObjectKind::View,
            name: "fine".to_string(),
            table_name: "fine".to_string(),
            statement: "CREATE VIEW fine AS SELECT name FROM users".to_string(),
        };
        let present = DependentObject {
            kind: ObjectKind::View,
            name: "legacy_names".to_string(),
            table_name: "legacy_names".to_string(),
            statement: "CREATE VIEW legacy_names AS SELECT 1".to_string(),
        };

        let outcomes = repairer.restore_all(&[broken, fine, present], None);
        assert_eq!(outcomes[0].action, ObjectAction::Failed);
        assert!(outcomes[0].error.is_some());
        assert!(matches!(
            outcomes[0].to_error(),
            Some(MigrationError::DependentRestoreFailed { .. })
        ));
        assert_eq!(outcomes[1].action, ObjectAction::Restored);
        assert_eq!(outcomes[2].action, ObjectAction::AlreadyPresent);
    }
}
