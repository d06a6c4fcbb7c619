//! Table-level constraint definitions.

use serde::Serialize;

use super::lexer::quote_ident;

/// Action taken on referencing rows when the referenced key changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferentialAction {
    NoAction,
    Restrict,
    SetNull,
    SetDefault,
    Cascade,
}

impl ReferentialAction {
    pub fn as_sql(&self) -> &'static str {
        match self {
            ReferentialAction::NoAction => "NO ACTION",
            ReferentialAction::Restrict => "RESTRICT",
            ReferentialAction::SetNull => "SET NULL",
            ReferentialAction::SetDefault => "SET DEFAULT",
            ReferentialAction::Cascade => "CASCADE",
        }
    }
}

impl std::fmt::Display for ReferentialAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// A foreign key from local columns to a referenced table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForeignKeyDef {
    /// Constraint name, if declared with `CONSTRAINT`.
    pub name: Option<String>,
    /// Referencing columns in this table.
    pub columns: Vec<String>,
    /// Referenced table.
    pub references_table: String,
    /// Referenced columns. Empty means the referenced table's primary key.
    pub references_columns: Vec<String>,
    pub on_delete: Option<ReferentialAction>,
    pub on_update: Option<ReferentialAction>,
    /// `DEFERRABLE INITIALLY DEFERRED`.
    pub deferred: bool,
}

impl ForeignKeyDef {
    /// Single-column reference to `table(column)`.
    pub fn new(
        column: impl Into<String>,
        references_table: impl Into<String>,
        references_column: impl Into<String>,
    ) -> Self {
        Self {
            name: None,
            columns: vec![column.into()],
            references_table: references_table.into(),
            references_columns: vec![references_column.into()],
            on_delete: None,
            on_update: None,
            deferred: false,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn on_delete(mut self, action: ReferentialAction) -> Self {
        self.on_delete = Some(action);
        self
    }

    pub fn on_update(mut self, action: ReferentialAction) -> Self {
        self.on_update = Some(action);
        self
    }

    /// Whether this key points at `table` (case-insensitive).
    pub fn targets(&self, table: &str) -> bool {
        self.references_table.eq_ignore_ascii_case(table)
    }

    /// Whether `column` is one of the referencing columns.
    pub fn uses_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c.eq_ignore_ascii_case(column))
    }

    /// Render as a table constraint clause.
    pub fn to_sql(&self) -> String {
        let mut sql = constraint_prefix(self.name.as_deref());
        sql.push_str(&format!(
            "FOREIGN KEY ({}) REFERENCES {}",
            ident_list(&self.columns),
            quote_ident(&self.references_table)
        ));
        if !self.references_columns.is_empty() {
            sql.push_str(&format!(" ({})", ident_list(&self.references_columns)));
        }
        if let Some(action) = self.on_delete {
            sql.push_str(&format!(" ON DELETE {}", action));
        }
        if let Some(action) = self.on_update {
            sql.push_str(&format!(" ON UPDATE {}", action));
        }
        if self.deferred {
            sql.push_str(" DEFERRABLE INITIALLY DEFERRED");
        }
        sql
    }

    /// Short human form: `user_id -> users(id)`.
    pub fn describe(&self) -> String {
        if self.references_columns.is_empty() {
            format!("{} -> {}", self.columns.join(", "), self.references_table)
        } else {
            format!(
                "{} -> {}({})",
                self.columns.join(", "),
                self.references_table,
                self.references_columns.join(", ")
            )
        }
    }
}

/// Table-level primary key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PrimaryKeyDef {
    pub name: Option<String>,
    pub columns: Vec<String>,
}

impl PrimaryKeyDef {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            name: None,
            columns,
        }
    }

    pub fn to_sql(&self) -> String {
        format!(
            "{}PRIMARY KEY ({})",
            constraint_prefix(self.name.as_deref()),
            ident_list(&self.columns)
        )
    }
}

/// Table-level uniqueness constraint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UniqueConstraint {
    pub name: Option<String>,
    pub columns: Vec<String>,
}

impl UniqueConstraint {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            name: None,
            columns,
        }
    }

    pub fn to_sql(&self) -> String {
        format!(
            "{}UNIQUE ({})",
            constraint_prefix(self.name.as_deref()),
            ident_list(&self.columns)
        )
    }
}

/// A `CHECK` constraint. The expression is stored without its parentheses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckConstraint {
    pub name: Option<String>,
    pub expression: String,
}

impl CheckConstraint {
    pub fn new(expression: impl Into<String>) -> Self {
        Self {
            name: None,
            expression: expression.into(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn to_sql(&self) -> String {
        format!(
            "{}CHECK ({})",
            constraint_prefix(self.name.as_deref()),
            self.expression
        )
    }
}

fn constraint_prefix(name: Option<&str>) -> String {
    match name {
        Some(name) => format!("CONSTRAINT {} ", quote_ident(name)),
        None => String::new(),
    }
}

pub(crate) fn ident_list(names: &[String]) -> String {
    names
        .iter()
        .map(|n| quote_ident(n))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_foreign_key_sql() {
        let fk = ForeignKeyDef::new("user_id", "users", "id").on_delete(ReferentialAction::Cascade);
        assert_eq!(
            fk.to_sql(),
            "FOREIGN KEY (\"user_id\") REFERENCES \"users\" (\"id\") ON DELETE CASCADE"
        );
        assert!(fk.targets("USERS"));
        assert_eq!(fk.describe(), "user_id -> users(id)");
    }

    #[test]
    fn test_named_check() {
        let check = CheckConstraint::new("length(name) > 0").with_name("name_present");
        assert_eq!(
            check.to_sql(),
            "CONSTRAINT \"name_present\" CHECK (length(name) > 0)"
        );
    }
}
