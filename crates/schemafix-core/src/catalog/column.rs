//! Column definitions.

use serde::Serialize;

use super::constraint::CheckConstraint;
use super::lexer::quote_ident;

/// A generated (computed) column expression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GeneratedColumn {
    pub expression: String,
    pub stored: bool,
}

/// A single column and its inline constraints.
///
/// Inline `REFERENCES` clauses are lifted into the table's foreign key list
/// by the parser, so a column never carries its own reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnDef {
    pub name: String,
    /// Declared type as written (`VARCHAR(255)`, `INTEGER`), if any.
    pub declared_type: Option<String>,
    pub not_null: bool,
    /// Default expression as written, including parentheses when present.
    pub default: Option<String>,
    pub collation: Option<String>,
    /// Inline `PRIMARY KEY`.
    pub primary_key: bool,
    pub autoincrement: bool,
    /// Inline `UNIQUE`.
    pub unique: bool,
    pub checks: Vec<CheckConstraint>,
    pub generated: Option<GeneratedColumn>,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, declared_type: impl Into<String>) -> Self {
        let declared_type = declared_type.into();
        Self {
            name: name.into(),
            declared_type: (!declared_type.is_empty()).then_some(declared_type),
            not_null: false,
            default: None,
            collation: None,
            primary_key: false,
            autoincrement: false,
            unique: false,
            checks: Vec::new(),
            generated: None,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    pub fn with_default(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn with_check(mut self, check: CheckConstraint) -> Self {
        self.checks.push(check);
        self
    }

    /// Whether rows can supply a value for this column on insert.
    pub fn is_insertable(&self) -> bool {
        self.generated.is_none()
    }

    /// Whether an insert that omits this column would still succeed.
    pub fn can_be_omitted(&self) -> bool {
        !self.not_null
            || self.default.is_some()
            || self.generated.is_some()
            || (self.primary_key && self.is_integer_typed())
    }

    fn is_integer_typed(&self) -> bool {
        self.declared_type
            .as_deref()
            .map(|t| t.eq_ignore_ascii_case("INTEGER"))
            .unwrap_or(false)
    }

    /// Render as a column definition inside `CREATE TABLE`.
    pub fn to_sql(&self) -> String {
        let mut sql = quote_ident(&self.name);
        if let Some(ty) = &self.declared_type {
            sql.push(' ');
            sql.push_str(ty);
        }
        if self.primary_key {
            sql.push_str(" PRIMARY KEY");
            if self.autoincrement {
                sql.push_str(" AUTOINCREMENT");
            }
        }
        if self.not_null {
            sql.push_str(" NOT NULL");
        }
        if self.unique {
            sql.push_str(" UNIQUE");
        }
        if let Some(default) = &self.default {
            sql.push_str(" DEFAULT ");
            sql.push_str(default);
        }
        if let Some(collation) = &self.collation {
            sql.push_str(" COLLATE ");
            sql.push_str(&quote_ident(collation));
        }
        for check in &self.checks {
            sql.push(' ');
            sql.push_str(&check.to_sql());
        }
        if let Some(generated) = &self.generated {
            sql.push_str(&format!(
                " GENERATED ALWAYS AS ({}) {}",
                generated.expression,
                if generated.stored { "STORED" } else { "VIRTUAL" }
            ));
        }
        sql
    }
}
