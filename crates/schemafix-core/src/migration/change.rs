//! Corrections applied to a table definition.

use serde::Serialize;

use super::error::MigrationError;
use crate::catalog::{
    references_identifier, replace_identifier, CheckConstraint, ColumnDef, ForeignKeyDef,
    TableDefinition,
};

/// One structural correction.
///
/// Changes are applied in order to a copy of the current definition to
/// produce the corrected one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SchemaChange {
    /// Point every foreign key that references `from_table` at `to_table`.
    RetargetForeignKey {
        from_table: String,
        to_table: String,
        /// Replacement referenced columns. Kept as-is when absent.
        to_columns: Option<Vec<String>>,
    },
    /// Remove columns and every constraint that mentions them.
    DropColumns { columns: Vec<String> },
    AddColumn { column: ColumnDef },
    /// Rename a column; copied rows carry its values over.
    RenameColumn { from: String, to: String },
    AddForeignKey { foreign_key: ForeignKeyDef },
    AddCheck { check: CheckConstraint },
    /// Replace the definition wholesale. The table name is kept.
    ReplaceDefinition { definition: TableDefinition },
}

impl SchemaChange {
    pub fn retarget_foreign_key(from_table: impl Into<String>, to_table: impl Into<String>) -> Self {
        SchemaChange::RetargetForeignKey {
            from_table: from_table.into(),
            to_table: to_table.into(),
            to_columns: None,
        }
    }

    pub fn drop_columns<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        SchemaChange::DropColumns {
            columns: columns.into_iter().map(Into::into).collect(),
        }
    }

    pub fn rename_column(from: impl Into<String>, to: impl Into<String>) -> Self {
        SchemaChange::RenameColumn {
            from: from.into(),
            to: to.into(),
        }
    }

    /// Apply to `def` in place.
    pub fn apply(&self, def: &mut TableDefinition) -> Result<(), MigrationError> {
        let table = def.name.clone();
        let invalid = |reason: String| MigrationError::InvalidPlan {
            target: table.clone(),
            reason,
        };

        match self {
            SchemaChange::RetargetForeignKey {
                from_table,
                to_table,
                to_columns,
            } => {
                let mut touched = 0;
                for fk in def.foreign_keys.iter_mut().filter(|fk| fk.targets(from_table)) {
                    fk.references_table = to_table.clone();
                    if let Some(columns) = to_columns {
                        fk.references_columns = columns.clone();
                    }
                    touched += 1;
                }
                if touched == 0 {
                    return Err(invalid(format!("no foreign key references {}", from_table)));
                }
            }
            SchemaChange::DropColumns { columns } => {
                for column in columns {
                    if !def.has_column(column) {
                        return Err(invalid(format!("cannot drop missing column {}", column)));
                    }
                    if def
                        .primary_key
                        .as_ref()
                        .is_some_and(|pk| pk.columns.iter().any(|c| c.eq_ignore_ascii_case(column)))
                        || def.column(column).is_some_and(|c| c.primary_key)
                    {
                        return Err(invalid(format!("cannot drop primary key column {}", column)));
                    }
                    drop_column(def, column)?;
                }
                if def.columns.is_empty() {
                    return Err(invalid("every column would be dropped".to_string()));
                }
            }
            SchemaChange::AddColumn { column } => {
                if def.has_column(&column.name) {
                    return Err(invalid(format!("column {} already exists", column.name)));
                }
                def.columns.push(column.clone());
            }
            SchemaChange::RenameColumn { from, to } => {
                if def.has_column(to) {
                    return Err(invalid(format!("column {} already exists", to)));
                }
                if !def.has_column(from) {
                    return Err(invalid(format!("cannot rename missing column {}", from)));
                }
                rename_column(def, from, to)?;
            }
            SchemaChange::AddForeignKey { foreign_key } => {
                for column in &foreign_key.columns {
                    if !def.has_column(column) {
                        return Err(invalid(format!(
                            "foreign key uses missing column {}",
                            column
                        )));
                    }
                }
                def.foreign_keys.push(foreign_key.clone());
            }
            SchemaChange::AddCheck { check } => {
                def.checks.push(check.clone());
            }
            SchemaChange::ReplaceDefinition { definition } => {
                let name = def.name.clone();
                *def = definition.clone();
                def.name = name;
                def.raw_sql = None;
            }
        }
        Ok(())
    }

    /// Source-to-target column renames this change implies.
    pub fn renames(&self) -> Option<(&str, &str)> {
        match self {
            SchemaChange::RenameColumn { from, to } => Some((from.as_str(), to.as_str())),
            _ => None,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            SchemaChange::RetargetForeignKey {
                from_table,
                to_table,
                ..
            } => format!("retarget foreign keys from {} to {}", from_table, to_table),
            SchemaChange::DropColumns { columns } => format!("drop column(s) {}", columns.join(", ")),
            SchemaChange::AddColumn { column } => format!("add column {}", column.name),
            SchemaChange::RenameColumn { from, to } => format!("rename column {} to {}", from, to),
            SchemaChange::AddForeignKey { foreign_key } => {
                format!("add foreign key {}", foreign_key.describe())
            }
            SchemaChange::AddCheck { check } => format!("add check ({})", check.expression),
            SchemaChange::ReplaceDefinition { .. } => "replace definition".to_string(),
        }
    }
}

fn drop_column(def: &mut TableDefinition, column: &str) -> Result<(), MigrationError> {
    def.columns.retain(|c| !c.name.eq_ignore_ascii_case(column));
    def.foreign_keys.retain(|fk| !fk.uses_column(column));
    def.unique_constraints
        .retain(|u| !u.columns.iter().any(|c| c.eq_ignore_ascii_case(column)));

    let mut kept = Vec::with_capacity(def.checks.len());
    for check in def.checks.drain(..) {
        if !references_identifier(&check.expression, column).map_err(crate::error::Error::from)? {
            kept.push(check);
        }
    }
    def.checks = kept;

    for col in &mut def.columns {
        let mut kept = Vec::with_capacity(col.checks.len());
        for check in col.checks.drain(..) {
            if !references_identifier(&check.expression, column).map_err(crate::error::Error::from)? {
                kept.push(check);
            }
        }
        col.checks = kept;
    }
    Ok(())
}

fn rename_column(def: &mut TableDefinition, from: &str, to: &str) -> Result<(), MigrationError> {
    let rewrite = |text: &str| -> Result<String, MigrationError> {
        replace_identifier(text, from, to).map_err(|e| crate::error::Error::from(e).into())
    };
    let same = |name: &str| name.eq_ignore_ascii_case(from);

    for col in &mut def.columns {
        if same(&col.name) {
            col.name = to.to_string();
        }
        for check in &mut col.checks {
            check.expression = rewrite(&check.expression)?;
        }
        if let Some(generated) = &mut col.generated {
            generated.expression = rewrite(&generated.expression)?;
        }
    }
    if let Some(pk) = &mut def.primary_key {
        rename_in(&mut pk.columns, from, to);
    }
    for fk in &mut def.foreign_keys {
        rename_in(&mut fk.columns, from, to);
    }
    for unique in &mut def.unique_constraints {
        rename_in(&mut unique.columns, from, to);
    }
    for check in &mut def.checks {
        check.expression = rewrite(&check.expression)?;
    }
    Ok(())
}

fn rename_in(names: &mut [String], from: &str, to: &str) {
    for name in names.iter_mut() {
        if name.eq_ignore_ascii_case(from) {
            *name = to.to_string();
        }
    }
}
