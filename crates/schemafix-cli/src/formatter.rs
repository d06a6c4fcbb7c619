//! Output formatters for reports.

use clap::ValueEnum;
use comfy_table::{Cell, Table};
use schemafix_core::migration::{
    BackupRecord, IntegrityReport, MigrationRecipe, MigrationReport, RestoreSummary,
};
use schemafix_core::store::ConsistencyStatus;
use serde::Serialize;

use crate::commands::Inspection;

/// Output format for results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// ASCII table format
    Table,
    /// JSON format
    Json,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Table => write!(f, "table"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

/// Trait for formatting output.
pub trait Formatter {
    fn format_inspection(&self, inspection: &Inspection) -> String;

    fn format_integrity(&self, report: &IntegrityReport) -> String;

    fn format_backup(&self, record: &BackupRecord) -> String;

    fn format_restore(&self, summary: &RestoreSummary) -> String;

    fn format_presets(&self, recipes: &[MigrationRecipe]) -> String;

    fn format_report(&self, report: &MigrationReport) -> String;

    fn format_error(&self, error: &str) -> String;
}

/// Create a formatter for the given output format.
pub fn create_formatter(format: OutputFormat) -> Box<dyn Formatter> {
    match format {
        OutputFormat::Table => Box::new(TableFormatter),
        OutputFormat::Json => Box::new(JsonFormatter),
    }
}

/// Table formatter using comfy-table.
pub struct TableFormatter;

impl Formatter for TableFormatter {
    fn format_inspection(&self, inspection: &Inspection) -> String {
        let def = &inspection.definition;
        let mut columns = Table::new();
        columns.set_header(vec!["Column", "Type", "Not null", "Default", "Key"]);
        let pk = def.primary_key_columns();
        for column in &def.columns {
            let key = if pk.iter().any(|c| c.eq_ignore_ascii_case(&column.name)) {
                "PK".to_string()
            } else {
                def.foreign_keys
                    .iter()
                    .find(|fk| fk.uses_column(&column.name))
                    .map(|fk| format!("-> {}", fk.references_table))
                    .unwrap_or_default()
            };
            columns.add_row(vec![
                Cell::new(&column.name),
                Cell::new(column.declared_type.as_deref().unwrap_or("")),
                Cell::new(if column.not_null { "yes" } else { "" }),
                Cell::new(column.default.as_deref().unwrap_or("")),
                Cell::new(key),
            ]);
        }

        let mut output = format!("Table {} ({} rows)\n{}", def.name, inspection.row_count, columns);

        if !def.foreign_keys.is_empty() {
            output.push_str("\n\nForeign keys:");
            for fk in &def.foreign_keys {
                output.push_str(&format!("\n  {}", fk.describe()));
            }
        }

        if !inspection.indexes.is_empty() || !inspection.dependents.is_empty() {
            let mut objects = Table::new();
            objects.set_header(vec!["Kind", "Name", "Statement"]);
            for index in &inspection.indexes {
                objects.add_row(vec!["index", index.name.as_str(), index.sql.as_str()]);
            }
            for object in &inspection.dependents {
                objects.add_row(vec![
                    Cell::new(object.kind),
                    Cell::new(&object.name),
                    Cell::new(&object.statement),
                ]);
            }
            output.push_str(&format!("\n\n{}", objects));
        }
        output
    }

    fn format_integrity(&self, report: &IntegrityReport) -> String {
        let mut output = format!("Integrity: {}", report.status);
        match &report.consistency {
            ConsistencyStatus::Ok => output.push_str("\nConsistency: ok"),
            ConsistencyStatus::Corrupted(problems) => {
                output.push_str("\nConsistency problems:");
                for problem in problems {
                    output.push_str(&format!("\n  {}", problem));
                }
            }
        }
        if report.violations.is_empty() {
            output.push_str("\nReferential violations: none");
        } else {
            let mut table = Table::new();
            table.set_header(vec!["Table", "Row", "Constraint"]);
            for violation in &report.violations {
                table.add_row(vec![
                    Cell::new(&violation.table),
                    Cell::new(
                        violation
                            .rowid
                            .map(|r| r.to_string())
                            .unwrap_or_else(|| "-".to_string()),
                    ),
                    Cell::new(&violation.constraint),
                ]);
            }
            output.push_str(&format!(
                "\nReferential violations ({}):\n{}",
                report.violations.len(),
                table
            ));
        }
        output
    }

    fn format_backup(&self, record: &BackupRecord) -> String {
        let mut table = Table::new();
        table.set_header(vec!["Table", "Rows", "Bytes", "SHA-256", "Path"]);
        table.add_row(vec![
            Cell::new(&record.table),
            Cell::new(record.row_count),
            Cell::new(record.bytes),
            Cell::new(&record.sha256),
            Cell::new(record.path.display()),
        ]);
        table.to_string()
    }

    fn format_restore(&self, summary: &RestoreSummary) -> String {
        format!(
            "Restored {} ({} rows) from {}",
            summary.table,
            summary.rows,
            summary.path.display()
        )
    }

    fn format_presets(&self, recipes: &[MigrationRecipe]) -> String {
        let mut table = Table::new();
        table.set_header(vec!["Preset", "Table", "Description"]);
        for recipe in recipes {
            table.add_row(vec![
                recipe.name.as_str(),
                recipe.table.as_str(),
                recipe.description.as_str(),
            ]);
        }
        table.to_string()
    }

    fn format_report(&self, report: &MigrationReport) -> String {
        let mut summary = Table::new();
        summary.set_header(vec!["Recipe", "Table", "Outcome", "Copied", "Excluded"]);
        let excluded = report.excluded.as_ref().map(|e| e.count).unwrap_or(0);
        summary.add_row(vec![
            Cell::new(&report.recipe),
            Cell::new(&report.table),
            Cell::new(report.outcome),
            Cell::new(report.rows_copied),
            Cell::new(excluded),
        ]);
        let mut output = summary.to_string();

        if let Some(plan) = &report.plan {
            output.push_str(&format!("\n\nDefect: {}", plan.defect));
            for change in &plan.changes {
                output.push_str(&format!("\n  - {}", change));
            }
            if let (Some(original), Some(eligible)) = (plan.original_rows, plan.eligible_rows) {
                output.push_str(&format!(
                    "\nWould copy {} of {} rows ({})",
                    eligible, original, plan.row_filter
                ));
            }
        }
        if let Some(reason) = report.excluded.as_ref().and_then(|e| e.reason.as_deref()) {
            output.push_str(&format!("\nExcluded because: {}", reason));
        }
        if let Some(backup) = &report.backup {
            output.push_str(&format!("\nBackup: {}", backup.path.display()));
        }

        if !report.dependents_restored.is_empty() {
            let mut objects = Table::new();
            objects.set_header(vec!["Kind", "Name", "Outcome", "Error"]);
            for outcome in &report.dependents_restored {
                objects.add_row(vec![
                    Cell::new(outcome.kind),
                    Cell::new(&outcome.name),
                    Cell::new(outcome.action),
                    Cell::new(outcome.error.as_deref().unwrap_or("")),
                ]);
            }
            output.push_str(&format!("\n\n{}", objects));
        }

        if let Some(integrity) = &report.integrity {
            output.push_str(&format!("\n\n{}", self.format_integrity(integrity)));
        }
        for warning in &report.warnings {
            output.push_str(&format!("\nwarning: {}", warning));
        }
        if let Some(failure) = &report.failure {
            output.push_str(&format!("\n{}: {}", failure.category, failure.message));
        }
        output
    }

    fn format_error(&self, error: &str) -> String {
        format!("Error: {}", error)
    }
}

/// JSON formatter.
pub struct JsonFormatter;

impl JsonFormatter {
    fn render<T: Serialize + ?Sized>(&self, value: &T) -> String {
        serde_json::to_string_pretty(value)
            .unwrap_or_else(|e| self.format_error(&format!("serialization failed: {}", e)))
    }
}

impl Formatter for JsonFormatter {
    fn format_inspection(&self, inspection: &Inspection) -> String {
        self.render(inspection)
    }

    fn format_integrity(&self, report: &IntegrityReport) -> String {
        self.render(report)
    }

    fn format_backup(&self, record: &BackupRecord) -> String {
        self.render(record)
    }

    fn format_restore(&self, summary: &RestoreSummary) -> String {
        self.render(summary)
    }

    fn format_presets(&self, recipes: &[MigrationRecipe]) -> String {
        self.render(recipes)
    }

    fn format_report(&self, report: &MigrationReport) -> String {
        self.render(report)
    }

    fn format_error(&self, error: &str) -> String {
        serde_json::json!({ "error": error }).to_string()
    }
}
