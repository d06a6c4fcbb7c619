//! Migration recipes and the plans derived from them.
//!
//! A [`MigrationRecipe`] states what a defective table looks like and how to
//! correct it. [`MigrationPlan::derive`] applies it to the table's current
//! definition, producing the corrected definition, the column mapping for
//! the copy, and the dependents and indexes to recreate.

use std::collections::HashMap;

use serde::Serialize;

use super::change::SchemaChange;
use super::dependents::{DependentObject, RewriteRule};
use super::error::MigrationError;
use super::filter::RowFilter;
use super::inspector::IndexDef;
use super::pattern::DefectPattern;
use crate::catalog::lexer::{tokenize, TokenKind};
use crate::catalog::{quote_ident, replace_identifier, TableDefinition};
use crate::error::Error;

/// How the copy treats rows that violate a constraint of the new table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Fail the rebuild; nothing is changed.
    Abort,
    /// Skip the row; reported as an unexplained loss.
    #[default]
    Ignore,
}

impl std::fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConflictPolicy::Abort => write!(f, "abort"),
            ConflictPolicy::Ignore => write!(f, "ignore"),
        }
    }
}

/// A named correction for one table.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationRecipe {
    /// Recipe name.
    pub name: String,
    /// What the recipe fixes.
    pub description: String,
    /// Table to migrate.
    pub table: String,
    /// Defect that triggers the migration.
    pub pattern: DefectPattern,
    /// Corrections, applied in order.
    pub changes: Vec<SchemaChange>,
    /// Rows to carry into the rebuilt table.
    pub row_filter: RowFilter,
    /// Rewrites applied to dependents before recreation.
    pub rewrite: RewriteRule,
    /// Tables that must exist before anything runs.
    pub required_tables: Vec<String>,
    /// Index statements created after the swap, replacing same-named ones.
    pub extra_indexes: Vec<String>,
    /// Target column values computed by expression instead of copied.
    pub column_expressions: Vec<(String, String)>,
    /// Overrides the configured conflict policy.
    pub on_conflict: Option<ConflictPolicy>,
}

impl MigrationRecipe {
    pub fn new(name: impl Into<String>, table: impl Into<String>, pattern: DefectPattern) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            table: table.into(),
            pattern,
            changes: Vec::new(),
            row_filter: RowFilter::All,
            rewrite: RewriteRule::new(),
            required_tables: Vec::new(),
            extra_indexes: Vec::new(),
            column_expressions: Vec::new(),
            on_conflict: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_change(mut self, change: SchemaChange) -> Self {
        self.changes.push(change);
        self
    }

    pub fn with_row_filter(mut self, filter: RowFilter) -> Self {
        self.row_filter = filter;
        self
    }

    /// Rewrite identifier `from` to `to` in recreated dependents.
    pub fn with_rewrite(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.rewrite = self.rewrite.replace(from, to);
        self
    }

    pub fn requires_table(mut self, table: impl Into<String>) -> Self {
        self.required_tables.push(table.into());
        self
    }

    pub fn with_index(mut self, statement: impl Into<String>) -> Self {
        self.extra_indexes.push(statement.into());
        self
    }

    pub fn with_column_expression(mut self, column: impl Into<String>, sql: impl Into<String>) -> Self {
        self.column_expressions.push((column.into(), sql.into()));
        self
    }

    pub fn on_conflict(mut self, policy: ConflictPolicy) -> Self {
        self.on_conflict = Some(policy);
        self
    }

    /// Stale names whose referencing dependents are dropped and rewritten.
    pub fn retired_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.pattern.retired_tables();
        for change in &self.changes {
            if let SchemaChange::RetargetForeignKey { from_table, .. } = change {
                names.push(from_table.clone());
            }
        }
        names.extend(self.rewrite.sources().map(str::to_string));
        dedup_ignore_case(names)
    }
}

/// Where a target column's value comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ColumnSource {
    /// Copied from this source column.
    Column(String),
    /// Computed by this SQL expression over the source row.
    Expression(String),
}

/// A target column and its value source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnMapping {
    pub target: String,
    pub source: ColumnSource,
}

/// Everything the rebuild needs, derived before any change is made.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationPlan {
    /// Recipe the plan came from.
    pub recipe: String,
    /// Table being migrated, as named in the catalog.
    pub table: String,
    /// The detected defect.
    pub defect: String,
    /// Corrections applied.
    pub changes: Vec<String>,
    /// Current definition.
    pub source: TableDefinition,
    /// Corrected definition.
    pub target: TableDefinition,
    /// Copied or computed target columns. Omitted columns take defaults.
    pub columns: Vec<ColumnMapping>,
    /// Source columns whose values are discarded.
    pub dropped_columns: Vec<String>,
    pub row_filter: RowFilter,
    pub on_conflict: ConflictPolicy,
    /// Objects dropped before the swap and recreated after it.
    pub dependents: Vec<DependentObject>,
    /// Index statements executed after the swap.
    pub indexes: Vec<IndexDef>,
    /// Indexes not recreated because they cover removed columns.
    pub skipped_indexes: Vec<String>,
    pub rewrite: RewriteRule,
    /// Tables that must exist for the corrected definition to hold.
    pub required_tables: Vec<String>,
}

impl MigrationPlan {
    /// Derive a plan, or `None` when `source` does not exhibit the defect.
    pub fn derive(
        recipe: &MigrationRecipe,
        source: &TableDefinition,
        dependents: Vec<DependentObject>,
        indexes: Vec<IndexDef>,
        default_conflict: ConflictPolicy,
    ) -> Result<Option<Self>, MigrationError> {
        if !recipe.pattern.matches(source) {
            return Ok(None);
        }
        let invalid = |reason: String| MigrationError::InvalidPlan {
            target: recipe.name.clone(),
            reason,
        };

        let mut target = source.clone();
        target.raw_sql = None;
        for change in &recipe.changes {
            change.apply(&mut target).map_err(|e| match e {
                MigrationError::InvalidPlan { reason, .. } => invalid(reason),
                other => other,
            })?;
        }
        if recipe.pattern.matches(&target) {
            return Err(invalid(format!(
                "corrected definition still has the defect: {}",
                recipe.pattern.describe()
            )));
        }

        for column in recipe.row_filter.source_columns() {
            if !source.has_column(column) {
                return Err(invalid(format!("row filter reads missing column {}", column)));
            }
        }

        let columns = map_columns(recipe, source, &target).map_err(invalid)?;
        let dropped_columns: Vec<String> = source
            .columns
            .iter()
            .filter(|c| c.is_insertable())
            .filter(|c| {
                !columns.iter().any(|m| {
                    matches!(&m.source, ColumnSource::Column(s) if s.eq_ignore_ascii_case(&c.name))
                })
            })
            .map(|c| c.name.clone())
            .collect();

        let renames: Vec<(&str, &str)> = recipe.changes.iter().filter_map(SchemaChange::renames).collect();
        let (indexes, skipped_indexes) =
            plan_indexes(recipe, &source.name, indexes, &dropped_columns, &renames)?;

        let mut required_tables: Vec<String> = recipe.required_tables.clone();
        required_tables.extend(
            target
                .referenced_tables()
                .into_iter()
                .filter(|t| !t.eq_ignore_ascii_case(&source.name))
                .map(str::to_string),
        );
        required_tables.extend(recipe.row_filter.referenced_tables().into_iter().map(str::to_string));

        Ok(Some(Self {
            recipe: recipe.name.clone(),
            table: source.name.clone(),
            defect: recipe.pattern.describe(),
            changes: recipe.changes.iter().map(SchemaChange::describe).collect(),
            source: source.clone(),
            target,
            columns,
            dropped_columns,
            row_filter: recipe.row_filter.clone(),
            on_conflict: recipe.on_conflict.unwrap_or(default_conflict),
            dependents,
            indexes,
            skipped_indexes,
            rewrite: recipe.rewrite.clone(),
            required_tables: dedup_ignore_case(required_tables),
        }))
    }

    /// `INSERT ... SELECT` that fills `shadow` from the source table.
    pub fn copy_statement(&self, shadow: &str) -> String {
        let verb = match self.on_conflict {
            ConflictPolicy::Abort => "INSERT",
            ConflictPolicy::Ignore => "INSERT OR IGNORE",
        };
        let targets: Vec<String> = self.columns.iter().map(|m| quote_ident(&m.target)).collect();
        let values: Vec<String> = self
            .columns
            .iter()
            .map(|m| match &m.source {
                ColumnSource::Column(name) => format!("src.{}", quote_ident(name)),
                ColumnSource::Expression(sql) => format!("({})", sql),
            })
            .collect();
        format!(
            "{} INTO {} ({}) SELECT {} FROM {} AS src WHERE {}",
            verb,
            quote_ident(shadow),
            targets.join(", "),
            values.join(", "),
            quote_ident(&self.table),
            self.row_filter.to_sql("src")
        )
    }

    /// Count of source rows the filter admits.
    pub fn eligible_count_statement(&self) -> String {
        format!(
            "SELECT COUNT(*) FROM {} AS src WHERE {}",
            quote_ident(&self.table),
            self.row_filter.to_sql("src")
        )
    }
}

fn map_columns(
    recipe: &MigrationRecipe,
    source: &TableDefinition,
    target: &TableDefinition,
) -> Result<Vec<ColumnMapping>, String> {
    // target name (lowercased) -> source column it was renamed from
    let mut renamed: HashMap<String, String> = HashMap::new();
    for (from, to) in recipe.changes.iter().filter_map(SchemaChange::renames) {
        let origin = renamed
            .remove(&from.to_ascii_lowercase())
            .unwrap_or_else(|| from.to_string());
        renamed.insert(to.to_ascii_lowercase(), origin);
    }

    let mut mappings = Vec::new();
    for column in target.columns.iter().filter(|c| c.is_insertable()) {
        let key = column.name.to_ascii_lowercase();
        let expression = recipe
            .column_expressions
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(&column.name))
            .map(|(_, sql)| sql.clone());

        let source_column = match renamed.get(&key) {
            Some(origin) => source.column(origin).map(|c| c.name.clone()),
            None => source
                .column(&column.name)
                .filter(|c| c.is_insertable())
                .map(|c| c.name.clone()),
        };

        let mapped = match (expression, source_column) {
            (Some(sql), _) => Some(ColumnSource::Expression(sql)),
            (None, Some(name)) => Some(ColumnSource::Column(name)),
            (None, None) => None,
        };
        match mapped {
            Some(source) => mappings.push(ColumnMapping {
                target: column.name.clone(),
                source,
            }),
            None if column.can_be_omitted() => {}
            None => {
                return Err(format!(
                    "column {} requires a value but has no source or default",
                    column.name
                ))
            }
        }
    }

    if mappings.is_empty() {
        return Err("no column of the corrected definition receives data".to_string());
    }
    Ok(mappings)
}

fn plan_indexes(
    recipe: &MigrationRecipe,
    table: &str,
    captured: Vec<IndexDef>,
    dropped_columns: &[String],
    renames: &[(&str, &str)],
) -> Result<(Vec<IndexDef>, Vec<String>), MigrationError> {
    let mut indexes = Vec::new();
    let mut skipped = Vec::new();

    'next: for index in captured {
        for column in dropped_columns {
            if index.mentions(column)? {
                skipped.push(index.name);
                continue 'next;
            }
        }
        let mut sql = index.sql.clone();
        for (from, to) in renames {
            sql = replace_identifier(&sql, from, to).map_err(Error::from)?;
        }
        indexes.push(IndexDef { sql, ..index });
    }

    for statement in &recipe.extra_indexes {
        let name = index_name(statement).ok_or_else(|| MigrationError::InvalidPlan {
            target: recipe.name.clone(),
            reason: format!("cannot read index name from: {}", statement),
        })?;
        indexes.retain(|i| !i.name.eq_ignore_ascii_case(&name));
        skipped.retain(|s| !s.eq_ignore_ascii_case(&name));
        indexes.push(IndexDef {
            name,
            table: table.to_string(),
            sql: statement.clone(),
        });
    }

    Ok((indexes, skipped))
}

/// Name declared by a `CREATE [UNIQUE] INDEX [IF NOT EXISTS] name` statement.
fn index_name(statement: &str) -> Option<String> {
    let tokens = tokenize(statement).ok()?;
    let mut iter = tokens.iter().peekable();
    if !iter.next()?.is_word("CREATE") {
        return None;
    }
    if iter.peek()?.is_word("UNIQUE") {
        iter.next();
    }
    if !iter.next()?.is_word("INDEX") {
        return None;
    }
    if iter.peek()?.is_word("IF") {
        iter.next();
        iter.next();
        iter.next();
    }
    let mut name = iter.next()?;
    if iter.peek().is_some_and(|t| t.is_punct(".")) {
        iter.next();
        name = iter.next()?;
    }
    matches!(name.kind, TokenKind::Word | TokenKind::QuotedIdent)
        .then(|| name.ident())
        .flatten()
}

fn dedup_ignore_case(names: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(names.len());
    for name in names {
        if !out.iter().any(|n| n.eq_ignore_ascii_case(&name)) {
            out.push(name);
        }
    }
    out
}
