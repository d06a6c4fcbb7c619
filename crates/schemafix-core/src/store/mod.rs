//! Relational store abstraction.
//!
//! Every migration component talks to the database through
//! [`RelationalStore`]. [`SqliteStore`] is the production implementation;
//! tests wrap it to inject faults at chosen statements.

pub mod config;
pub mod sqlite;
pub mod value;

pub use config::StoreConfig;
pub use sqlite::SqliteStore;
pub use value::Value;

use serde::Serialize;

use crate::catalog::quote_ident;
use crate::error::{Error, Result};

/// Kind of a schema object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    Table,
    View,
    Index,
    Trigger,
}

impl ObjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::Table => "table",
            ObjectKind::View => "view",
            ObjectKind::Index => "index",
            ObjectKind::Trigger => "trigger",
        }
    }

    pub fn parse(kind: &str) -> Option<Self> {
        match kind {
            "table" => Some(ObjectKind::Table),
            "view" => Some(ObjectKind::View),
            "index" => Some(ObjectKind::Index),
            "trigger" => Some(ObjectKind::Trigger),
            _ => None,
        }
    }

    /// Keyword used in `DROP <kind>`.
    pub fn keyword(&self) -> &'static str {
        match self {
            ObjectKind::Table => "TABLE",
            ObjectKind::View => "VIEW",
            ObjectKind::Index => "INDEX",
            ObjectKind::Trigger => "TRIGGER",
        }
    }
}

impl std::fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A schema catalog entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaObject {
    pub kind: ObjectKind,
    pub name: String,
    /// Table the object belongs to. Views name themselves.
    pub table_name: String,
    /// Creation statement. Absent for automatic indexes.
    pub sql: Option<String>,
}

/// Result of the store's physical consistency check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "problems", rename_all = "snake_case")]
pub enum ConsistencyStatus {
    Ok,
    Corrupted(Vec<String>),
}

impl ConsistencyStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, ConsistencyStatus::Ok)
    }
}

/// A row whose reference does not resolve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReferentialViolation {
    /// Referencing table.
    pub table: String,
    /// Offending row, when the table has a rowid.
    pub rowid: Option<i64>,
    pub referenced_table: String,
    /// The violated key, e.g. `user_id -> users(id)`.
    pub constraint: String,
}

/// Buffered query output.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

/// Callback receiving one row at a time: column names, then values.
pub type RowCallback<'a> = dyn FnMut(&[String], &[Value]) -> Result<()> + 'a;

/// Operations a migration needs from a relational store.
pub trait RelationalStore {
    /// Execute a single statement, returning the number of rows changed.
    fn execute(&self, statement: &str) -> Result<usize>;

    /// Execute a script of `;`-separated statements.
    fn execute_script(&self, script: &str) -> Result<()>;

    /// Run a query, streaming each row to `on_row`.
    fn query_each(&self, statement: &str, on_row: &mut RowCallback<'_>) -> Result<()>;

    /// Start an exclusive-write transaction.
    fn begin_transaction(&self) -> Result<()>;

    fn commit(&self) -> Result<()>;

    fn rollback(&self) -> Result<()>;

    fn in_transaction(&self) -> bool;

    /// Look up a schema object by kind and name.
    fn schema_object(&self, kind: ObjectKind, name: &str) -> Result<Option<SchemaObject>>;

    /// All schema objects, in creation order.
    fn schema_objects(&self) -> Result<Vec<SchemaObject>>;

    fn foreign_keys_enabled(&self) -> Result<bool>;

    /// Toggle referential enforcement. Has no effect inside a transaction.
    fn set_foreign_keys(&self, enabled: bool) -> Result<()>;

    /// Physical consistency check over the whole store.
    fn check_consistency(&self) -> Result<ConsistencyStatus>;

    /// Referential check over one table, or every table when `None`.
    fn check_referential_integrity(&self, table: Option<&str>) -> Result<Vec<ReferentialViolation>>;

    /// Run a query and buffer the whole result.
    fn query(&self, statement: &str) -> Result<QueryResult> {
        let mut result = QueryResult::default();
        self.query_each(statement, &mut |columns: &[String], values: &[Value]| {
            if result.columns.is_empty() {
                result.columns = columns.to_vec();
            }
            result.rows.push(values.to_vec());
            Ok(())
        })?;
        Ok(result)
    }

    /// Run a query returning a single integer.
    fn query_i64(&self, statement: &str) -> Result<i64> {
        let result = self.query(statement)?;
        result
            .rows
            .first()
            .and_then(|row| row.first())
            .and_then(Value::as_i64)
            .ok_or_else(|| Error::InvalidData(format!("expected an integer from: {}", statement)))
    }

    /// Schema objects other than tables that mention `name`.
    ///
    /// Matches either by owning table or by an identifier token in the
    /// object's statement, so a name appearing inside a string literal or
    /// as part of a longer identifier does not count.
    fn objects_referencing(&self, name: &str) -> Result<Vec<SchemaObject>> {
        let mut found = Vec::new();
        for object in self.schema_objects()? {
            if object.kind == ObjectKind::Table {
                continue;
            }
            let owned = object.kind != ObjectKind::View
                && object.table_name.eq_ignore_ascii_case(name);
            let mentioned = match &object.sql {
                Some(sql) => crate::catalog::references_identifier(sql, name)?,
                None => false,
            };
            if owned || mentioned {
                found.push(object);
            }
        }
        Ok(found)
    }

    fn table_exists(&self, table: &str) -> Result<bool> {
        Ok(self.schema_object(ObjectKind::Table, table)?.is_some())
    }

    fn count_rows(&self, table: &str) -> Result<u64> {
        let count = self.query_i64(&format!("SELECT COUNT(*) FROM {}", quote_ident(table)))?;
        Ok(count.max(0) as u64)
    }
}
