//! Row eligibility filters for the copy phase.

use serde::Serialize;

use crate::catalog::quote_ident;

/// Which source rows are copied into the rebuilt table.
///
/// Filters render to a SQL predicate evaluated against the source table,
/// aliased as `src`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RowFilter {
    /// Every row is eligible.
    #[default]
    All,
    /// `column` is NULL or names an existing `parent_table.parent_column`.
    ReferenceExists {
        column: String,
        parent_table: String,
        parent_column: String,
    },
    /// `column` is not NULL.
    NotNull { column: String },
    /// Free-form predicate over the source row.
    Expression { sql: String, description: String },
    /// Every filter must hold.
    AllOf { filters: Vec<RowFilter> },
}

impl RowFilter {
    pub fn reference_exists(
        column: impl Into<String>,
        parent_table: impl Into<String>,
        parent_column: impl Into<String>,
    ) -> Self {
        RowFilter::ReferenceExists {
            column: column.into(),
            parent_table: parent_table.into(),
            parent_column: parent_column.into(),
        }
    }

    pub fn not_null(column: impl Into<String>) -> Self {
        RowFilter::NotNull {
            column: column.into(),
        }
    }

    pub fn expression(sql: impl Into<String>, description: impl Into<String>) -> Self {
        RowFilter::Expression {
            sql: sql.into(),
            description: description.into(),
        }
    }

    pub fn is_all(&self) -> bool {
        match self {
            RowFilter::All => true,
            RowFilter::AllOf { filters } => filters.iter().all(RowFilter::is_all),
            _ => false,
        }
    }

    /// Render as a predicate over the row alias `alias`.
    pub fn to_sql(&self, alias: &str) -> String {
        match self {
            RowFilter::All => "1".to_string(),
            RowFilter::ReferenceExists {
                column,
                parent_table,
                parent_column,
            } => {
                let local = format!("{}.{}", alias, quote_ident(column));
                format!(
                    "({local} IS NULL OR EXISTS (SELECT 1 FROM {parent} AS parent WHERE parent.{key} = {local}))",
                    local = local,
                    parent = quote_ident(parent_table),
                    key = quote_ident(parent_column),
                )
            }
            RowFilter::NotNull { column } => {
                format!("{}.{} IS NOT NULL", alias, quote_ident(column))
            }
            RowFilter::Expression { sql, .. } => format!("({})", sql),
            RowFilter::AllOf { filters } => {
                let parts: Vec<String> = filters
                    .iter()
                    .filter(|f| !f.is_all())
                    .map(|f| f.to_sql(alias))
                    .collect();
                if parts.is_empty() {
                    "1".to_string()
                } else {
                    parts.join(" AND ")
                }
            }
        }
    }

    /// Why an excluded row was excluded.
    pub fn describe(&self) -> String {
        match self {
            RowFilter::All => "no filter".to_string(),
            RowFilter::ReferenceExists {
                column,
                parent_table,
                parent_column,
            } => format!(
                "{} references a missing {}.{}",
                column, parent_table, parent_column
            ),
            RowFilter::NotNull { column } => format!("{} is NULL", column),
            RowFilter::Expression { description, .. } => description.clone(),
            RowFilter::AllOf { filters } => filters
                .iter()
                .filter(|f| !f.is_all())
                .map(RowFilter::describe)
                .collect::<Vec<_>>()
                .join("; or "),
        }
    }

    /// Tables the filter reads besides the source table.
    pub fn referenced_tables(&self) -> Vec<&str> {
        match self {
            RowFilter::ReferenceExists { parent_table, .. } => vec![parent_table.as_str()],
            RowFilter::AllOf { filters } => filters.iter().flat_map(|f| f.referenced_tables()).collect(),
            _ => Vec::new(),
        }
    }

    /// Source columns the filter reads.
    pub fn source_columns(&self) -> Vec<&str> {
        match self {
            RowFilter::ReferenceExists { column, .. } | RowFilter::NotNull { column } => {
                vec![column.as_str()]
            }
            RowFilter::AllOf { filters } => filters.iter().flat_map(|f| f.source_columns()).collect(),
            _ => Vec::new(),
        }
    }
}
