//! Structured table definitions.

use serde::Serialize;

use super::column::ColumnDef;
use super::constraint::{CheckConstraint, ForeignKeyDef, PrimaryKeyDef, UniqueConstraint};
use super::lexer::quote_ident;
use super::parser::{parse_create_table, ParseError};

/// A table's declared structure.
///
/// Produced by parsing the stored `CREATE TABLE` text and rendered back with
/// [`TableDefinition::to_create_sql`]. The parse/render pair is stable:
/// parsing a rendered definition yields the same structure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableDefinition {
    pub name: String,
    pub columns: Vec<ColumnDef>,
    /// Table-level primary key. Inline keys live on the column.
    pub primary_key: Option<PrimaryKeyDef>,
    pub foreign_keys: Vec<ForeignKeyDef>,
    pub unique_constraints: Vec<UniqueConstraint>,
    pub checks: Vec<CheckConstraint>,
    pub without_rowid: bool,
    pub strict: bool,
    /// Definition text as stored, when this came from a parse.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_sql: Option<String>,
}

impl TableDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            primary_key: None,
            foreign_keys: Vec::new(),
            unique_constraints: Vec::new(),
            checks: Vec::new(),
            without_rowid: false,
            strict: false,
            raw_sql: None,
        }
    }

    /// Parse a `CREATE TABLE` statement.
    pub fn parse(sql: &str) -> Result<Self, ParseError> {
        parse_create_table(sql)
    }

    pub fn with_column(mut self, column: ColumnDef) -> Self {
        self.columns.push(column);
        self
    }

    pub fn with_primary_key(mut self, columns: Vec<String>) -> Self {
        self.primary_key = Some(PrimaryKeyDef::new(columns));
        self
    }

    pub fn with_foreign_key(mut self, fk: ForeignKeyDef) -> Self {
        self.foreign_keys.push(fk);
        self
    }

    pub fn with_unique(mut self, columns: Vec<String>) -> Self {
        self.unique_constraints.push(UniqueConstraint::new(columns));
        self
    }

    pub fn with_check(mut self, check: CheckConstraint) -> Self {
        self.checks.push(check);
        self
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn column_mut(&mut self, name: &str) -> Option<&mut ColumnDef> {
        self.columns
            .iter_mut()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Primary key columns, whether declared inline or at table level.
    pub fn primary_key_columns(&self) -> Vec<&str> {
        if let Some(pk) = &self.primary_key {
            return pk.columns.iter().map(String::as_str).collect();
        }
        self.columns
            .iter()
            .filter(|c| c.primary_key)
            .map(|c| c.name.as_str())
            .collect()
    }

    /// Foreign keys pointing at `table`.
    pub fn foreign_keys_to<'a>(&'a self, table: &'a str) -> impl Iterator<Item = &'a ForeignKeyDef> {
        self.foreign_keys.iter().filter(move |fk| fk.targets(table))
    }

    /// Distinct referenced tables, in declaration order.
    pub fn referenced_tables(&self) -> Vec<&str> {
        let mut tables: Vec<&str> = Vec::new();
        for fk in &self.foreign_keys {
            if !tables
                .iter()
                .any(|t| t.eq_ignore_ascii_case(&fk.references_table))
            {
                tables.push(&fk.references_table);
            }
        }
        tables
    }

    /// Every check expression, inline and table-level.
    pub fn check_expressions(&self) -> impl Iterator<Item = &str> {
        self.columns
            .iter()
            .flat_map(|c| c.checks.iter())
            .chain(self.checks.iter())
            .map(|c| c.expression.as_str())
    }

    /// Compare structure, ignoring the stored text and the table name.
    pub fn same_shape(&self, other: &TableDefinition) -> bool {
        let mut a = self.clone();
        let mut b = other.clone();
        a.raw_sql = None;
        b.raw_sql = None;
        a.name = String::new();
        b.name = String::new();
        a == b
    }

    /// Render `CREATE TABLE` under this definition's own name.
    pub fn to_create_sql(&self) -> String {
        self.to_create_sql_named(&self.name)
    }

    /// Render `CREATE TABLE` under another name (used for shadow tables).
    pub fn to_create_sql_named(&self, name: &str) -> String {
        let mut items: Vec<String> = self.columns.iter().map(ColumnDef::to_sql).collect();
        if let Some(pk) = &self.primary_key {
            items.push(pk.to_sql());
        }
        items.extend(self.unique_constraints.iter().map(UniqueConstraint::to_sql));
        items.extend(self.checks.iter().map(CheckConstraint::to_sql));
        items.extend(self.foreign_keys.iter().map(ForeignKeyDef::to_sql));

        let mut sql = format!(
            "CREATE TABLE {} (\n    {}\n)",
            quote_ident(name),
            items.join(",\n    ")
        );

        let mut options = Vec::new();
        if self.without_rowid {
            options.push("WITHOUT ROWID");
        }
        if self.strict {
            options.push("STRICT");
        }
        if !options.is_empty() {
            sql.push(' ');
            sql.push_str(&options.join(", "));
        }
        sql
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ReferentialAction;

    fn user_roles() -> TableDefinition {
        TableDefinition::new("user_roles")
            .with_column(ColumnDef::new("id", "INTEGER").primary_key())
            .with_column(ColumnDef::new("user_id", "INTEGER").not_null())
            .with_column(ColumnDef::new("role", "TEXT").not_null().with_default("'viewer'"))
            .with_foreign_key(
                ForeignKeyDef::new("user_id", "users", "id").on_delete(ReferentialAction::Cascade),
            )
            .with_unique(vec!["user_id".into(), "role".into()])
    }

    #[test]
    fn test_render_and_reparse() {
        let def = user_roles();
        let sql = def.to_create_sql();
        let parsed = TableDefinition::parse(&sql).unwrap();
        assert!(parsed.same_shape(&def));
        assert_eq!(parsed.raw_sql.as_deref(), Some(sql.as_str()));
    }

    #[test]
    fn test_rename_on_render() {
        let sql = user_roles().to_create_sql_named("user_roles_new");
        assert!(sql.starts_with("CREATE TABLE \"user_roles_new\" ("));
    }

    #[test]
    fn test_lookups() {
        let def = user_roles();
        assert!(def.has_column("USER_ID"));
        assert_eq!(def.primary_key_columns(), vec!["id"]);
        assert_eq!(def.referenced_tables(), vec!["users"]);
        assert_eq!(def.foreign_keys_to("users").count(), 1);
        assert_eq!(def.foreign_keys_to("users_legacy_backup").count(), 0);
    }
}
