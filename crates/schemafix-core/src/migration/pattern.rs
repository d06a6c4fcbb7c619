//! Structural defect patterns.
//!
//! A pattern is a predicate over a [`TableDefinition`]. Migrations run only
//! when their pattern matches, and the corrected definition must no longer
//! match, which is what makes a rerun a no-op.

use serde::Serialize;

use crate::catalog::TableDefinition;

/// A structural predicate identifying a defective definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DefectPattern {
    /// Some foreign key references `table`.
    ForeignKeyTargets { table: String },
    /// At least one of `columns` is present.
    HasColumns { columns: Vec<String> },
    /// At least one of `columns` is absent.
    MissingColumns { columns: Vec<String> },
    /// `column` has no foreign key to `references_table`.
    MissingForeignKey {
        column: String,
        references_table: String,
    },
    /// No check constraint contains `fragment` (whitespace and case ignored).
    MissingCheck { fragment: String },
    AnyOf { patterns: Vec<DefectPattern> },
    AllOf { patterns: Vec<DefectPattern> },
}

impl DefectPattern {
    pub fn foreign_key_targets(table: impl Into<String>) -> Self {
        DefectPattern::ForeignKeyTargets {
            table: table.into(),
        }
    }

    pub fn has_columns<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        DefectPattern::HasColumns {
            columns: columns.into_iter().map(Into::into).collect(),
        }
    }

    pub fn missing_columns<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        DefectPattern::MissingColumns {
            columns: columns.into_iter().map(Into::into).collect(),
        }
    }

    pub fn missing_foreign_key(column: impl Into<String>, references_table: impl Into<String>) -> Self {
        DefectPattern::MissingForeignKey {
            column: column.into(),
            references_table: references_table.into(),
        }
    }

    pub fn missing_check(fragment: impl Into<String>) -> Self {
        DefectPattern::MissingCheck {
            fragment: fragment.into(),
        }
    }

    /// Check the predicate against a definition.
    pub fn matches(&self, def: &TableDefinition) -> bool {
        match self {
            DefectPattern::ForeignKeyTargets { table } => def.foreign_keys_to(table).next().is_some(),
            DefectPattern::HasColumns { columns } => columns.iter().any(|c| def.has_column(c)),
            DefectPattern::MissingColumns { columns } => columns.iter().any(|c| !def.has_column(c)),
            DefectPattern::MissingForeignKey {
                column,
                references_table,
            } => !def
                .foreign_keys_to(references_table)
                .any(|fk| fk.uses_column(column)),
            DefectPattern::MissingCheck { fragment } => {
                let needle = normalize(fragment);
                !def.check_expressions().any(|e| normalize(e).contains(&needle))
            }
            DefectPattern::AnyOf { patterns } => patterns.iter().any(|p| p.matches(def)),
            DefectPattern::AllOf { patterns } => patterns.iter().all(|p| p.matches(def)),
        }
    }

    /// Human description of the defect.
    pub fn describe(&self) -> String {
        match self {
            DefectPattern::ForeignKeyTargets { table } => {
                format!("foreign key references {}", table)
            }
            DefectPattern::HasColumns { columns } => {
                format!("has column(s) {}", columns.join(", "))
            }
            DefectPattern::MissingColumns { columns } => {
                format!("lacks column(s) {}", columns.join(", "))
            }
            DefectPattern::MissingForeignKey {
                column,
                references_table,
            } => format!("{} has no foreign key to {}", column, references_table),
            DefectPattern::MissingCheck { fragment } => format!("no check on {}", fragment),
            DefectPattern::AnyOf { patterns } => join(patterns, " or "),
            DefectPattern::AllOf { patterns } => join(patterns, " and "),
        }
    }

    /// Table names this pattern treats as stale reference targets.
    pub fn retired_tables(&self) -> Vec<String> {
        match self {
            DefectPattern::ForeignKeyTargets { table } => vec![table.clone()],
            DefectPattern::AnyOf { patterns } | DefectPattern::AllOf { patterns } => {
                patterns.iter().flat_map(|p| p.retired_tables()).collect()
            }
            _ => Vec::new(),
        }
    }
}

fn join(patterns: &[DefectPattern], sep: &str) -> String {
    patterns
        .iter()
        .map(|p| format!("({})", p.describe()))
        .collect::<Vec<_>>()
        .join(sep)
}

fn normalize(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}
