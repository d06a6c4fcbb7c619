//! Reads current table structure from the store.

use serde::Serialize;
use tracing::debug;

use super::error::MigrationError;
use super::pattern::DefectPattern;
use crate::catalog::{references_identifier, TableDefinition};
use crate::error::Error;
use crate::store::{ObjectKind, RelationalStore};

/// An explicitly created index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexDef {
    pub name: String,
    pub table: String,
    /// Creation statement as stored.
    pub sql: String,
}

impl IndexDef {
    /// Whether the index statement mentions `column`.
    pub fn mentions(&self, column: &str) -> Result<bool, Error> {
        Ok(references_identifier(&self.sql, column)?)
    }
}

/// Result of checking a table against a defect pattern.
#[derive(Debug, Clone)]
pub enum Detection {
    /// The table does not exist.
    TableMissing,
    /// The table exists and does not exhibit the defect.
    Clean(TableDefinition),
    /// The table exhibits the defect.
    Defective(TableDefinition),
}

impl Detection {
    pub fn is_defective(&self) -> bool {
        matches!(self, Detection::Defective(_))
    }
}

/// Inspects table definitions and their indexes.
pub struct SchemaInspector<'a> {
    store: &'a dyn RelationalStore,
}

impl<'a> SchemaInspector<'a> {
    pub fn new(store: &'a dyn RelationalStore) -> Self {
        Self { store }
    }

    /// Current structured definition of `table`, or `None` when absent.
    pub fn inspect(&self, table: &str) -> Result<Option<TableDefinition>, MigrationError> {
        let Some(object) = self.store.schema_object(ObjectKind::Table, table)? else {
            return Ok(None);
        };
        let sql = object
            .sql
            .ok_or_else(|| Error::InvalidData(format!("table {} has no stored definition", table)))?;
        let mut def = TableDefinition::parse(&sql).map_err(Error::from)?;
        def.name = object.name;
        debug!(table = %def.name, columns = def.columns.len(), "inspected table");
        Ok(Some(def))
    }

    /// Check `table` against `pattern`.
    pub fn detect(&self, table: &str, pattern: &DefectPattern) -> Result<Detection, MigrationError> {
        Ok(match self.inspect(table)? {
            None => Detection::TableMissing,
            Some(def) if pattern.matches(&def) => Detection::Defective(def),
            Some(def) => Detection::Clean(def),
        })
    }

    /// Explicit indexes on `table`, in creation order.
    pub fn indexes(&self, table: &str) -> Result<Vec<IndexDef>, MigrationError> {
        Ok(self
            .store
            .schema_objects()?
            .into_iter()
            .filter(|o| o.kind == ObjectKind::Index && o.table_name.eq_ignore_ascii_case(table))
            .filter_map(|o| {
                o.sql.map(|sql| IndexDef {
                    name: o.name,
                    table: o.table_name,
                    sql,
                })
            })
            .collect())
    }

    /// Names from `tables` that do not exist.
    pub fn missing_tables<S: AsRef<str>>(&self, tables: &[S]) -> Result<Vec<String>, MigrationError> {
        let mut missing = Vec::new();
        for table in tables {
            let table = table.as_ref();
            if !self.store.table_exists(table)? && !missing.iter().any(|m: &String| m.eq_ignore_ascii_case(table)) {
                missing.push(table.to_string());
            }
        }
        Ok(missing)
    }

    pub fn row_count(&self, table: &str) -> Result<u64, MigrationError> {
        Ok(self.store.count_rows(table)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;

    fn store() -> SqliteStore {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .execute_script(
                "CREATE TABLE users_legacy_backup (id INTEGER PRIMARY KEY);
                 CREATE TABLE User_Roles (
                     id INTEGER PRIMARY KEY,
                     user_id INTEGER NOT NULL REFERENCES users_legacy_backup(id),
                     role TEXT UNIQUE
                 );
                 CREATE INDEX idx_user_roles_user ON User_Roles (user_id);",
            )
            .unwrap();
        store
    }

    #[test]
    fn test_inspect_uses_catalog_name() {
        let store = store();
        let inspector = SchemaInspector::new(&store);
        let def = inspector.inspect("user_roles").unwrap().unwrap();
        assert_eq!(def.name, "User_Roles");
        assert!(def.column("user_id").unwrap().not_null);
        assert!(inspector.inspect("nope").unwrap().is_none());
    }

    #[test]
    fn test_detect() {
        let store = store();
        let inspector = SchemaInspector::new(&store);
        let legacy = DefectPattern::foreign_key_targets("users_legacy_backup");
        assert!(inspector.detect("user_roles", &legacy).unwrap().is_defective());
        assert!(matches!(
            inspector
                .detect("user_roles", &DefectPattern::foreign_key_targets("users"))
                .unwrap(),
            Detection::Clean(_)
        ));
        assert!(matches!(
            inspector.detect("missing", &legacy).unwrap(),
            Detection::TableMissing
        ));
    }

    #[test]
    fn test_indexes_skip_automatic() {
        let store = store();
        let inspector = SchemaInspector::new(&store);
        let indexes = inspector.indexes("user_roles").unwrap();
        assert_eq!(indexes.len(), 1);
        assert_eq!(indexes[0].name, "idx_user_roles_user");
        assert!(indexes[0].mentions("user_id").unwrap());
        assert!(!indexes[0].mentions("role").unwrap());
    }

    #[test]
    fn test_missing_tables() {
        let store = store();
        let inspector = SchemaInspector::new(&store);
        let missing = inspector
            .missing_tables(&["users_legacy_backup", "users", "USERS"])
            .unwrap();
        assert_eq!(missing, vec!["users"]);
    }
}
