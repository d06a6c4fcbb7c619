//! Schemafix Core - schema repair engine for SQLite.
//!
//! This crate parses stored table definitions, detects known structural
//! defects, and rebuilds affected tables in place with a verified backup,
//! a transactional shadow-table swap, and a post-migration integrity audit.

pub mod catalog;
pub mod error;
pub mod migration;
pub mod store;

pub use catalog::{
    parse_create_table, CheckConstraint, ColumnDef, ForeignKeyDef, ParseError, ReferentialAction,
    TableDefinition,
};
pub use error::{Error, Result};
pub use migration::{
    DefectPattern, IntegrityReport, IntegrityValidator, MigrationConfig, MigrationError,
    MigrationRecipe, MigrationReport, MigrationRunner, Outcome, RowFilter, SchemaChange,
};
pub use store::{RelationalStore, SqliteStore, StoreConfig, Value};
