//! Structured table definitions.
//!
//! The store keeps table structure as `CREATE TABLE` text. This module
//! parses that text into a [`TableDefinition`] so defects can be detected
//! and corrected definitions derived without string matching, and renders
//! definitions back to DDL for shadow tables.

pub mod column;
pub mod constraint;
pub mod lexer;
pub mod parser;
pub mod table;

pub use column::{ColumnDef, GeneratedColumn};
pub use constraint::{
    CheckConstraint, ForeignKeyDef, PrimaryKeyDef, ReferentialAction, UniqueConstraint,
};
pub use lexer::{quote_ident, references_identifier, replace_identifier};
pub use parser::{parse_create_table, ParseError};
pub use table::TableDefinition;
