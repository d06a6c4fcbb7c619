//! SQLite-backed [`RelationalStore`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use tracing::debug;

use super::config::StoreConfig;
use super::value::Value;
use super::{ConsistencyStatus, ObjectKind, ReferentialViolation, RelationalStore, RowCallback, SchemaObject};
use crate::catalog::quote_ident;
use crate::error::Result;

/// A single SQLite connection.
pub struct SqliteStore {
    conn: Connection,
    path: Option<PathBuf>,
}

impl SqliteStore {
    /// Open the database described by `config`.
    pub fn open(config: &StoreConfig) -> Result<Self> {
        let mut flags = OpenFlags::SQLITE_OPEN_URI | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        if config.read_only {
            flags |= OpenFlags::SQLITE_OPEN_READ_ONLY;
        } else {
            flags |= OpenFlags::SQLITE_OPEN_READ_WRITE;
            if config.create_if_missing {
                flags |= OpenFlags::SQLITE_OPEN_CREATE;
            }
        }

        let conn = Connection::open_with_flags(&config.path, flags)?;
        conn.busy_timeout(config.busy_timeout)?;
        conn.execute_batch(if config.enforce_foreign_keys {
            "PRAGMA foreign_keys = ON"
        } else {
            "PRAGMA foreign_keys = OFF"
        })?;

        debug!(
            path = %config.path.display(),
            read_only = config.read_only,
            "opened store"
        );

        Ok(Self {
            conn,
            path: Some(config.path.clone()),
        })
    }

    /// Open a private in-memory database with referential enforcement on.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON")?;
        Ok(Self { conn, path: None })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn object_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Option<SchemaObject>> {
        let kind: String = row.get(0)?;
        let Some(kind) = ObjectKind::parse(&kind) else {
            return Ok(None);
        };
        Ok(Some(SchemaObject {
            kind,
            name: row.get(1)?,
            table_name: row.get(2)?,
            sql: row.get(3)?,
        }))
    }

    /// Describe each foreign key of `table` by its id.
    fn foreign_key_descriptions(&self, table: &str) -> Result<HashMap<i64, String>> {
        let mut stmt = self
            .conn
            .prepare(&format!("PRAGMA foreign_key_list({})", quote_ident(table)))?;
        let mut keys: HashMap<i64, (String, Vec<String>, Vec<String>)> = HashMap::new();
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let id: i64 = row.get(0)?;
            let parent: String = row.get(2)?;
            let from: String = row.get(3)?;
            let to: Option<String> = row.get(4)?;
            let entry = keys
                .entry(id)
                .or_insert_with(|| (parent, Vec::new(), Vec::new()));
            entry.1.push(from);
            if let Some(to) = to {
                entry.2.push(to);
            }
        }

        Ok(keys
            .into_iter()
            .map(|(id, (parent, from, to))| {
                let description = if to.is_empty() {
                    format!("{} -> {}", from.join(", "), parent)
                } else {
                    format!("{} -> {}({})", from.join(", "), parent, to.join(", "))
                };
                (id, description)
            })
            .collect())
    }
}

impl RelationalStore for SqliteStore {
    fn execute(&self, statement: &str) -> Result<usize> {
        Ok(self.conn.execute(statement, [])?)
    }

    fn execute_script(&self, script: &str) -> Result<()> {
        Ok(self.conn.execute_batch(script)?)
    }

    fn query_each(&self, statement: &str, on_row: &mut RowCallback<'_>) -> Result<()> {
        let mut stmt = self.conn.prepare(statement)?;
        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let values = (0..columns.len())
                .map(|i| row.get_ref(i).map(Value::from))
                .collect::<rusqlite::Result<Vec<_>>>()?;
            on_row(&columns, &values)?;
        }
        Ok(())
    }

    fn begin_transaction(&self) -> Result<()> {
        Ok(self.conn.execute_batch("BEGIN IMMEDIATE")?)
    }

    fn commit(&self) -> Result<()> {
        Ok(self.conn.execute_batch("COMMIT")?)
    }

    fn rollback(&self) -> Result<()> {
        Ok(self.conn.execute_batch("ROLLBACK")?)
    }

    fn in_transaction(&self) -> bool {
        !self.conn.is_autocommit()
    }

    fn schema_object(&self, kind: ObjectKind, name: &str) -> Result<Option<SchemaObject>> {
        let object = self
            .conn
            .query_row(
                "SELECT type, name, tbl_name, sql FROM sqlite_master \
                 WHERE type = ?1 AND name = ?2 COLLATE NOCASE",
                params![kind.as_str(), name],
                Self::object_from_row,
            )
            .optional()?;
        Ok(object.flatten())
    }

    fn schema_objects(&self) -> Result<Vec<SchemaObject>> {
        let mut stmt = self
            .conn
            .prepare("SELECT type, name, tbl_name, sql FROM sqlite_master ORDER BY rowid")?;
        let objects = stmt
            .query_map([], Self::object_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(objects.into_iter().flatten().collect())
    }

    fn foreign_keys_enabled(&self) -> Result<bool> {
        let enabled: i64 = self
            .conn
            .query_row("PRAGMA foreign_keys", [], |row| row.get(0))?;
        Ok(enabled != 0)
    }

    fn set_foreign_keys(&self, enabled: bool) -> Result<()> {
        let value = if enabled { "ON" } else { "OFF" };
        Ok(self
            .conn
            .execute_batch(&format!("PRAGMA foreign_keys = {}", value))?)
    }

    fn check_consistency(&self) -> Result<ConsistencyStatus> {
        let mut stmt = self.conn.prepare("PRAGMA integrity_check")?;
        let problems = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        if problems.len() == 1 && problems[0] == "ok" {
            Ok(ConsistencyStatus::Ok)
        } else {
            Ok(ConsistencyStatus::Corrupted(problems))
        }
    }

    fn check_referential_integrity(&self, table: Option<&str>) -> Result<Vec<ReferentialViolation>> {
        let sql = match table {
            Some(table) => format!("PRAGMA foreign_key_check({})", quote_ident(table)),
            None => "PRAGMA foreign_key_check".to_string(),
        };
        let mut stmt = self.conn.prepare(&sql)?;
        let raw = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<i64>>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut descriptions: HashMap<String, HashMap<i64, String>> = HashMap::new();
        let mut violations = Vec::with_capacity(raw.len());
        for (child, rowid, parent, fkid) in raw {
            if !descriptions.contains_key(&child) {
                let described = self.foreign_key_descriptions(&child)?;
                descriptions.insert(child.clone(), described);
            }
            let constraint = descriptions
                .get(&child)
                .and_then(|keys| keys.get(&fkid))
                .cloned()
                .unwrap_or_else(|| format!("foreign key #{} -> {}", fkid, parent));
            violations.push(ReferentialViolation {
                table: child,
                rowid,
                referenced_table: parent,
                constraint,
            });
        }
        Ok(violations)
    }
}
