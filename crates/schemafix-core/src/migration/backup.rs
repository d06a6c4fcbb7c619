//! Pre-migration table backups.
//!
//! A backup is a replayable SQL script: the table's stored definition, one
//! `INSERT` per row with values rendered as literals that reproduce the
//! original storage class, then the table's indexes and triggers. The file
//! is flushed to disk and its checksum verified by re-reading before the
//! backup is reported complete.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use super::error::MigrationError;
use crate::catalog::{quote_ident, TableDefinition};
use crate::error::Error;
use crate::store::{ObjectKind, RelationalStore, Value};

/// Default directory for backup files.
pub const DEFAULT_BACKUP_DIR: &str = "data/migration_backups";

const MAX_NAME_ATTEMPTS: u32 = 100;
const TABLE_HEADER: &str = "-- table: ";
const ROWS_TRAILER: &str = "-- rows: ";

/// A completed, verified backup.
#[derive(Debug, Clone, Serialize)]
pub struct BackupRecord {
    pub table: String,
    pub created_at: DateTime<Utc>,
    pub path: PathBuf,
    /// Table definition as stored at backup time.
    pub definition_sql: String,
    /// Index and trigger statements captured with the table.
    pub companion_sql: Vec<String>,
    pub columns: Vec<String>,
    pub row_count: u64,
    pub bytes: u64,
    /// Hex SHA-256 of the file contents.
    pub sha256: String,
}

/// Outcome of replaying a backup file.
#[derive(Debug, Clone, Serialize)]
pub struct RestoreSummary {
    pub table: String,
    pub path: PathBuf,
    pub rows: u64,
}

/// Writes table backups to a directory.
pub struct BackupWriter<'a> {
    store: &'a dyn RelationalStore,
    dir: PathBuf,
}

impl<'a> BackupWriter<'a> {
    pub fn new(store: &'a dyn RelationalStore, dir: impl Into<PathBuf>) -> Self {
        Self {
            store,
            dir: dir.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Capture `table`'s definition and every row.
    pub fn snapshot(&self, table: &str) -> Result<BackupRecord, MigrationError> {
        let failed = |reason: String| MigrationError::BackupFailed {
            table: table.to_string(),
            reason,
        };

        let object = self
            .store
            .schema_object(ObjectKind::Table, table)
            .map_err(|e| failed(e.to_string()))?
            .ok_or_else(|| failed("table does not exist".to_string()))?;
        let definition_sql = object
            .sql
            .clone()
            .ok_or_else(|| failed("table has no stored definition".to_string()))?;
        let companion_sql = self
            .companions(&object.name)
            .map_err(|e| failed(e.to_string()))?;

        fs::create_dir_all(&self.dir)
            .map_err(|e| failed(format!("cannot create {}: {}", self.dir.display(), e)))?;

        let created_at = Utc::now();
        let (path, file) = allocate_file(&self.dir, &object.name, created_at)
            .map_err(|e| failed(format!("cannot create backup file: {}", e)))?;

        match self.write_and_verify(&object.name, &definition_sql, &companion_sql, created_at, &path, file) {
            Ok((columns, row_count, bytes, sha256)) => {
                info!(
                    table = %object.name,
                    rows = row_count,
                    path = %path.display(),
                    "backup written"
                );
                Ok(BackupRecord {
                    table: object.name,
                    created_at,
                    path,
                    definition_sql,
                    companion_sql,
                    columns,
                    row_count,
                    bytes,
                    sha256,
                })
            }
            Err(e) => {
                if let Err(remove) = fs::remove_file(&path) {
                    warn!(path = %path.display(), error = %remove, "could not remove partial backup");
                }
                Err(failed(e.to_string()))
            }
        }
    }

    fn companions(&self, table: &str) -> Result<Vec<String>, Error> {
        Ok(self
            .store
            .schema_objects()?
            .into_iter()
            .filter(|o| {
                matches!(o.kind, ObjectKind::Index | ObjectKind::Trigger)
                    && o.table_name.eq_ignore_ascii_case(table)
            })
            .filter_map(|o| o.sql)
            .collect())
    }

    fn write_and_verify(
        &self,
        table: &str,
        definition_sql: &str,
        companion_sql: &[String],
        created_at: DateTime<Utc>,
        path: &Path,
        file: File,
    ) -> Result<(Vec<String>, u64, u64, String), Error> {
        let mut out = HashingWriter::new(BufWriter::new(file));

        writeln!(out, "-- schemafix table backup")?;
        writeln!(out, "{}{}", TABLE_HEADER, serde_json::to_string(table)?)?;
        writeln!(out, "-- created_at: {}", created_at.to_rfc3339())?;
        writeln!(out, "{};", definition_sql)?;

        let select = select_statement(table, definition_sql);
        let insert_prefix = format!("INSERT INTO {}", quote_ident(table));
        let mut columns: Vec<String> = Vec::new();
        let mut column_list = String::new();
        let mut row_count = 0u64;
        self.store.query_each(&select, &mut |names: &[String], values: &[Value]| -> Result<(), Error> {
            if column_list.is_empty() {
                columns = names.to_vec();
                column_list = names.iter().map(|n| quote_ident(n)).collect::<Vec<_>>().join(", ");
            }
            let literals: Vec<String> = values.iter().map(Value::to_sql_literal).collect();
            writeln!(
                out,
                "{} ({}) VALUES ({});",
                insert_prefix,
                column_list,
                literals.join(", ")
            )?;
            row_count += 1;
            Ok(())
        })?;
        // after the rows, so triggers do not fire on replay
        for sql in companion_sql {
            writeln!(out, "{};", sql)?;
        }
        writeln!(out, "{}{}", ROWS_TRAILER, row_count)?;

        let (writer, digest, bytes) = out.finish();
        let file = writer
            .into_inner()
            .map_err(|e| Error::Io(e.into_error()))?;
        file.sync_all()?;
        drop(file);

        let written = hex::encode(digest);
        let on_disk = hex::encode(Sha256::digest(fs::read(path)?));
        if written != on_disk {
            return Err(Error::InvalidData(format!(
                "checksum mismatch after write: expected {}, found {}",
                written, on_disk
            )));
        }
        Ok((columns, row_count, bytes, written))
    }
}

/// Columns to back up: every column that accepts inserted values.
fn select_statement(table: &str, definition_sql: &str) -> String {
    let columns = TableDefinition::parse(definition_sql)
        .ok()
        .map(|def| {
            def.columns
                .iter()
                .filter(|c| c.is_insertable())
                .map(|c| quote_ident(&c.name))
                .collect::<Vec<_>>()
        })
        .filter(|cols| !cols.is_empty());
    match columns {
        Some(cols) => format!("SELECT {} FROM {}", cols.join(", "), quote_ident(table)),
        None => format!("SELECT * FROM {}", quote_ident(table)),
    }
}

/// Create a fresh file named after the table and timestamp. Never
/// overwrites: a numeric suffix is added on collision.
fn allocate_file(dir: &Path, table: &str, at: DateTime<Utc>) -> io::Result<(PathBuf, File)> {
    let stem = format!("{}_{}", file_safe(table), at.format("%Y%m%d_%H%M%S"));
    for attempt in 0..MAX_NAME_ATTEMPTS {
        let name = if attempt == 0 {
            format!("{}.sql", stem)
        } else {
            format!("{}_{:02}.sql", stem, attempt)
        };
        let path = dir.join(name);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((path, file)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e),
        }
    }
    Err(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("no free backup file name for {}", stem),
    ))
}

fn file_safe(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect()
}

/// Replay a backup file, replacing the table it contains.
///
/// Runs in one transaction with referential enforcement suspended; the
/// row count must match the count recorded in the file.
pub fn restore_backup(store: &dyn RelationalStore, path: &Path) -> Result<RestoreSummary, MigrationError> {
    let script = fs::read_to_string(path).map_err(|e| MigrationError::BackupFailed {
        table: path.display().to_string(),
        reason: format!("cannot read backup: {}", e),
    })?;
    let (table, expected_rows) = read_header(&script).map_err(|reason| MigrationError::BackupFailed {
        table: path.display().to_string(),
        reason,
    })?;
    let failed = |reason: String| MigrationError::BackupFailed {
        table: table.clone(),
        reason: format!("restore failed: {}", reason),
    };

    let fk_enabled = store.foreign_keys_enabled()?;
    if fk_enabled {
        store.set_foreign_keys(false)?;
    }
    let result = replay_in_transaction(store, &table, &script, expected_rows);
    if fk_enabled {
        if let Err(e) = store.set_foreign_keys(true) {
            warn!(error = %e, "could not re-enable foreign keys after restore");
        }
    }

    let rows = result.map_err(|e| failed(e.to_string()))?;
    info!(table = %table, rows, path = %path.display(), "backup restored");
    Ok(RestoreSummary {
        table,
        path: path.to_path_buf(),
        rows,
    })
}

fn replay_in_transaction(
    store: &dyn RelationalStore,
    table: &str,
    script: &str,
    expected_rows: u64,
) -> Result<u64, Error> {
    store.begin_transaction()?;
    let replayed = store
        .execute(&format!("DROP TABLE IF EXISTS {}", quote_ident(table)))
        .and_then(|_| store.execute_script(script))
        .and_then(|_| store.count_rows(table))
        .and_then(|rows| {
            if rows == expected_rows {
                Ok(rows)
            } else {
                Err(Error::InvalidData(format!(
                    "restored {} rows, backup records {}",
                    rows, expected_rows
                )))
            }
        });
    match replayed {
        Ok(rows) => {
            store.commit()?;
            Ok(rows)
        }
        Err(e) => {
            if let Err(rollback) = store.rollback() {
                warn!(error = %rollback, "rollback after failed restore also failed");
            }
            Err(e)
        }
    }
}

fn read_header(script: &str) -> Result<(String, u64), String> {
    let table_line = script
        .lines()
        .find_map(|l| l.strip_prefix(TABLE_HEADER))
        .ok_or_else(|| "missing table header".to_string())?;
    let table: String =
        serde_json::from_str(table_line).map_err(|e| format!("bad table header: {}", e))?;
    let rows_line = script
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .and_then(|l| l.strip_prefix(ROWS_TRAILER))
        .ok_or_else(|| "backup is truncated: missing row trailer".to_string())?;
    let rows = rows_line
        .trim()
        .parse::<u64>()
        .map_err(|e| format!("bad row trailer: {}", e))?;
    Ok((table, rows))
}

/// Writer that hashes and counts everything passing through it.
struct HashingWriter<W: Write> {
    inner: W,
    hasher: Sha256,
    bytes: u64,
}

impl<W: Write> HashingWriter<W> {
    fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            bytes: 0,
        }
    }

    fn finish(self) -> (W, Vec<u8>, u64) {
        (self.inner, self.hasher.finalize().to_vec(), self.bytes)
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.bytes += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;
    use tempfile::tempdir;

    fn store() -> SqliteStore {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .execute_script(
                "CREATE TABLE notes (
                     id INTEGER PRIMARY KEY,
                     body TEXT,
                     weight REAL,
                     payload BLOB,
                     size INTEGER GENERATED ALWAYS AS (length(body)) VIRTUAL
                 );
                 CREATE INDEX idx_notes_weight ON notes (weight);
                 INSERT INTO notes (id, body, weight, payload) VALUES
                     (1, 'it''s here', 1.5, X'DEADBEEF'),
                     (2, NULL, NULL, NULL),
                     (3, 'two
lines', -2.0, X'');",
            )
            .unwrap();
        store
    }

    #[test]
    fn test_snapshot_writes_replayable_script() {
        let dir = tempdir().unwrap();
        let store = store();
        let record = BackupWriter::new(&store, dir.path()).snapshot("notes").unwrap();

        assert_eq!(record.row_count, 3);
        assert_eq!(record.columns, vec!["id", "body", "weight", "payload"]);
        assert_eq!(record.companion_sql.len(), 1);
        assert!(record.path.starts_with(dir.path()));
        let file_name = record.path.file_name().unwrap().to_string_lossy().to_string();
        assert!(file_name.starts_with("notes_") && file_name.ends_with(".sql"));

        let contents = fs::read_to_string(&record.path).unwrap();
        assert!(contents.contains("-- table: \"notes\""));
        assert!(contents.contains("VALUES (1, 'it''s here', 1.5, X'DEADBEEF');"));
        assert!(contents.trim_end().ends_with("-- rows: 3"));
        assert_eq!(hex::encode(Sha256::digest(contents.as_bytes())), record.sha256);
        assert_eq!(record.bytes, contents.len() as u64);
    }

    #[test]
    fn test_restore_round_trip() {
        let dir = tempdir().unwrap();
        let store = store();
        let before = store.query("SELECT * FROM notes ORDER BY id").unwrap();
        let record = BackupWriter::new(&store, dir.path()).snapshot("notes").unwrap();

        store.execute("DELETE FROM notes WHERE id = 1").unwrap();
        store.execute("UPDATE notes SET body = 'changed' WHERE id = 3").unwrap();

        let summary = restore_backup(&store, &record.path).unwrap();
        assert_eq!(summary.table, "notes");
        assert_eq!(summary.rows, 3);

        let after = store.query("SELECT * FROM notes ORDER BY id").unwrap();
        assert_eq!(before, after);
        assert!(store.schema_object(ObjectKind::Index, "idx_notes_weight").unwrap().is_some());
        assert!(store.foreign_keys_enabled().unwrap());
    }

    #[test]
    fn test_snapshot_never_overwrites() {
        let dir = tempdir().unwrap();
        let store = store();
        let writer = BackupWriter::new(&store, dir.path());
        let first = writer.snapshot("notes").unwrap();
        let second = writer.snapshot("notes").unwrap();
        assert_ne!(first.path, second.path);
        assert!(first.path.exists() && second.path.exists());
    }

    #[test]
    fn test_snapshot_fails_when_directory_unusable() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("not_a_dir");
        fs::write(&blocker, b"x").unwrap();
        let store = store();
        let err = BackupWriter::new(&store, &blocker).snapshot("notes").unwrap_err();
        assert!(matches!(err, MigrationError::BackupFailed { .. }));

        let err = BackupWriter::new(&store, dir.path()).snapshot("ghost").unwrap_err();
        assert!(matches!(err, MigrationError::BackupFailed { .. }));
    }

    #[test]
    fn test_restore_rejects_truncated_file() {
        let dir = tempdir().unwrap();
        let store = store();
        let record = BackupWriter::new(&store, dir.path()).snapshot("notes").unwrap();
        let contents = fs::read_to_string(&record.path).unwrap();
        let truncated: String = contents
            .lines()
            .filter(|l| !l.starts_with(ROWS_TRAILER))
            .map(|l| format!("{}\n", l))
            .collect();
        let path = dir.path().join("truncated.sql");
        fs::write(&path, truncated).unwrap();

        let err = restore_backup(&store, &path).unwrap_err();
        assert!(matches!(err, MigrationError::BackupFailed { .. }));
        assert_eq!(store.count_rows("notes").unwrap(), 3);
    }
}
