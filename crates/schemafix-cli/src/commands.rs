//! Command handlers.

use std::path::Path;

use schemafix_core::migration::{
    restore_backup, BackupWriter, DependentObject, DependentObjectRepairer, IndexDef,
    IntegrityValidator, MigrationConfig, MigrationRunner, SchemaInspector,
};
use schemafix_core::{RelationalStore, TableDefinition};
use serde::Serialize;
use tracing::info;

use crate::error::CliError;
use crate::formatter::Formatter;
use crate::presets;

/// Process exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// Succeeded, not needed, or would migrate.
    Success,
    /// A run or integrity check failed.
    Failed,
    /// Bad arguments or the store could not be opened.
    Usage,
}

impl ExitStatus {
    pub fn code(self) -> i32 {
        match self {
            ExitStatus::Success => 0,
            ExitStatus::Failed => 1,
            ExitStatus::Usage => 2,
        }
    }
}

/// Rendered output of a command.
#[derive(Debug)]
pub struct CommandOutput {
    pub text: String,
    pub status: ExitStatus,
}

impl CommandOutput {
    fn success(text: String) -> Self {
        Self {
            text,
            status: ExitStatus::Success,
        }
    }

    fn with_status(text: String, ok: bool) -> Self {
        Self {
            text,
            status: if ok { ExitStatus::Success } else { ExitStatus::Failed },
        }
    }
}

/// What `inspect` shows about one table.
#[derive(Debug, Serialize)]
pub struct Inspection {
    pub definition: TableDefinition,
    pub row_count: u64,
    pub indexes: Vec<IndexDef>,
    pub dependents: Vec<DependentObject>,
}

pub fn inspect(
    store: &dyn RelationalStore,
    table: &str,
    formatter: &dyn Formatter,
) -> Result<CommandOutput, CliError> {
    let inspector = SchemaInspector::new(store);
    let definition = inspector
        .inspect(table)?
        .ok_or_else(|| CliError::TableNotFound(table.to_string()))?;
    let no_retired: &[&str] = &[];
    let inspection = Inspection {
        row_count: inspector.row_count(&definition.name)?,
        indexes: inspector.indexes(&definition.name)?,
        dependents: DependentObjectRepairer::new(store).find_dependents(&definition.name, no_retired)?,
        definition,
    };
    Ok(CommandOutput::success(formatter.format_inspection(&inspection)))
}

pub fn check(
    store: &dyn RelationalStore,
    table: Option<&str>,
    formatter: &dyn Formatter,
) -> Result<CommandOutput, CliError> {
    let report = IntegrityValidator::new(store).validate(table);
    Ok(CommandOutput::with_status(
        formatter.format_integrity(&report),
        report.is_ok(),
    ))
}

pub fn backup(
    store: &dyn RelationalStore,
    table: &str,
    dir: &Path,
    formatter: &dyn Formatter,
) -> Result<CommandOutput, CliError> {
    let record = BackupWriter::new(store, dir).snapshot(table)?;
    Ok(CommandOutput::success(formatter.format_backup(&record)))
}

pub fn list_presets(formatter: &dyn Formatter) -> CommandOutput {
    CommandOutput::success(formatter.format_presets(&presets::all()))
}

pub fn run(
    store: &dyn RelationalStore,
    preset: &str,
    config: MigrationConfig,
    formatter: &dyn Formatter,
) -> Result<CommandOutput, CliError> {
    let recipe = presets::find(preset).ok_or_else(|| CliError::UnknownPreset(preset.to_string()))?;
    let report = MigrationRunner::new(store, config).run(&recipe);
    Ok(CommandOutput::with_status(
        formatter.format_report(&report),
        report.is_success(),
    ))
}

pub fn restore(
    store: &dyn RelationalStore,
    file: &Path,
    formatter: &dyn Formatter,
) -> Result<CommandOutput, CliError> {
    info!(path = %file.display(), "restoring backup");
    let summary = restore_backup(store, file)?;
    Ok(CommandOutput::success(formatter.format_restore(&summary)))
}
