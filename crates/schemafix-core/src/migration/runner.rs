//! Migration orchestration.
//!
//! [`MigrationRunner::run`] drives one recipe through the run state machine
//! and always returns a [`MigrationReport`]; errors become the report's
//! failure entry instead of propagating.

use std::path::PathBuf;

use serde::Serialize;
use tracing::{error, info, warn};

use super::backup::{BackupRecord, BackupWriter, DEFAULT_BACKUP_DIR};
use super::dependents::{DependentObjectRepairer, ObjectOutcome};
use super::error::{FailureCategory, MigrationError};
use super::inspector::{Detection, SchemaInspector};
use super::integrity::{IntegrityReport, IntegrityScope, IntegrityValidator};
use super::plan::{ConflictPolicy, MigrationPlan, MigrationRecipe};
use super::rebuild::{RebuildOutcome, TableRebuilder, DEFAULT_SHADOW_SUFFIX};
use super::state::{RunPhase, RunState};
use crate::store::RelationalStore;

/// Runner configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationConfig {
    /// Directory backups are written to.
    pub backup_dir: PathBuf,
    /// Appended to the table name to name the shadow table.
    pub shadow_suffix: String,
    /// Detect and plan only.
    pub dry_run: bool,
    pub integrity_scope: IntegrityScope,
    /// Conflict policy for recipes that do not set one.
    pub on_conflict: ConflictPolicy,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            backup_dir: PathBuf::from(DEFAULT_BACKUP_DIR),
            shadow_suffix: DEFAULT_SHADOW_SUFFIX.to_string(),
            dry_run: false,
            integrity_scope: IntegrityScope::default(),
            on_conflict: ConflictPolicy::default(),
        }
    }
}

impl MigrationConfig {
    pub fn with_backup_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.backup_dir = dir.into();
        self
    }

    pub fn with_shadow_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.shadow_suffix = suffix.into();
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_integrity_scope(mut self, scope: IntegrityScope) -> Self {
        self.integrity_scope = scope;
        self
    }

    pub fn with_conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.on_conflict = policy;
        self
    }
}

/// Final outcome of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// The table does not have the defect; nothing was written.
    NotNeeded,
    /// Dry run found the defect; nothing was written.
    WouldMigrate,
    Succeeded,
    Failed,
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::NotNeeded => write!(f, "not_needed"),
            Outcome::WouldMigrate => write!(f, "would_migrate"),
            Outcome::Succeeded => write!(f, "succeeded"),
            Outcome::Failed => write!(f, "failed"),
        }
    }
}

/// Rows left out of the rebuilt table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExclusionSummary {
    pub count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// A failure as reported to operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureReport {
    pub category: FailureCategory,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity: Option<String>,
    pub message: String,
}

impl From<&MigrationError> for FailureReport {
    fn from(e: &MigrationError) -> Self {
        Self {
            category: e.category(),
            entity: e.entity(),
            message: e.to_string(),
        }
    }
}

/// What the plan would do, recorded before any write.
#[derive(Debug, Clone, Serialize)]
pub struct PlanSummary {
    pub defect: String,
    pub changes: Vec<String>,
    /// Corrected `CREATE TABLE` statement.
    pub target_sql: String,
    pub row_filter: String,
    pub on_conflict: ConflictPolicy,
    /// Dependents as `kind name`.
    pub dependents: Vec<String>,
    pub indexes: Vec<String>,
    pub skipped_indexes: Vec<String>,
    pub dropped_columns: Vec<String>,
    pub required_tables: Vec<String>,
    /// Current row count; filled on dry runs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_rows: Option<u64>,
    /// Rows the filter admits; filled on dry runs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eligible_rows: Option<u64>,
}

impl From<&MigrationPlan> for PlanSummary {
    fn from(plan: &MigrationPlan) -> Self {
        Self {
            defect: plan.defect.clone(),
            changes: plan.changes.clone(),
            target_sql: plan.target.to_create_sql_named(&plan.table),
            row_filter: plan.row_filter.describe(),
            on_conflict: plan.on_conflict,
            dependents: plan
                .dependents
                .iter()
                .map(|d| format!("{} {}", d.kind, d.name))
                .collect(),
            indexes: plan.indexes.iter().map(|i| i.name.clone()).collect(),
            skipped_indexes: plan.skipped_indexes.clone(),
            dropped_columns: plan.dropped_columns.clone(),
            required_tables: plan.required_tables.clone(),
            original_rows: None,
            eligible_rows: None,
        }
    }
}

/// Structured result of one run.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationReport {
    pub recipe: String,
    pub table: String,
    pub outcome: Outcome,
    /// Phase history with timestamps.
    pub state: RunState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<PlanSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup: Option<BackupRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rebuild: Option<RebuildOutcome>,
    pub rows_copied: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub excluded: Option<ExclusionSummary>,
    /// Per-object outcome of recreating dependents.
    pub dependents_restored: Vec<ObjectOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub integrity: Option<IntegrityReport>,
    pub warnings: Vec<String>,
    /// Non-fatal failures, such as dependents that could not be recreated.
    pub issues: Vec<FailureReport>,
    /// The failure that ended the run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureReport>,
}

impl MigrationReport {
    fn new(recipe: &MigrationRecipe) -> Self {
        Self {
            recipe: recipe.name.clone(),
            table: recipe.table.clone(),
            outcome: Outcome::Failed,
            state: RunState::new(),
            plan: None,
            backup: None,
            rebuild: None,
            rows_copied: 0,
            excluded: None,
            dependents_restored: Vec::new(),
            integrity: None,
            warnings: Vec::new(),
            issues: Vec::new(),
            failure: None,
        }
    }

    /// Runs that end in success, not needed, or would migrate.
    pub fn is_success(&self) -> bool {
        self.outcome != Outcome::Failed
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    fn advance(&mut self, phase: RunPhase) -> Result<(), MigrationError> {
        self.state.advance(phase)?;
        info!(recipe = %self.recipe, table = %self.table, %phase, "phase");
        Ok(())
    }

    fn fail(&mut self, e: MigrationError) {
        let stopped_in = self.state.phase;
        error!(
            recipe = %self.recipe,
            table = %self.table,
            phase = %stopped_in,
            category = %e.category(),
            error = %e,
            "migration failed"
        );
        self.state.fail(e.to_string());
        self.failure = Some(FailureReport::from(&e));
    }

    fn finish(mut self) -> Self {
        if !self.state.is_terminal() {
            self.state.fail("run ended before a terminal phase");
        }
        self.outcome = match self.state.phase {
            RunPhase::NotNeeded => Outcome::NotNeeded,
            RunPhase::Planned => Outcome::WouldMigrate,
            RunPhase::Succeeded => Outcome::Succeeded,
            _ => Outcome::Failed,
        };
        info!(
            recipe = %self.recipe,
            table = %self.table,
            outcome = %self.outcome,
            copied = self.rows_copied,
            "migration finished"
        );
        self
    }
}

/// Drives recipes through detection, backup, rebuild, restore, and
/// validation.
pub struct MigrationRunner<'a> {
    store: &'a dyn RelationalStore,
    config: MigrationConfig,
}

impl<'a> MigrationRunner<'a> {
    pub fn new(store: &'a dyn RelationalStore, config: MigrationConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    /// Run `recipe` once.
    pub fn run(&self, recipe: &MigrationRecipe) -> MigrationReport {
        let mut report = MigrationReport::new(recipe);
        info!(recipe = %recipe.name, table = %recipe.table, dry_run = self.config.dry_run, "migration started");
        if let Err(e) = self.execute(recipe, &mut report) {
            report.fail(e);
        }
        report.finish()
    }

    fn execute(&self, recipe: &MigrationRecipe, report: &mut MigrationReport) -> Result<(), MigrationError> {
        let store = self.store;
        let inspector = SchemaInspector::new(store);

        let source = match inspector.detect(&recipe.table, &recipe.pattern)? {
            Detection::TableMissing => {
                report.warnings.push(format!("table {} does not exist", recipe.table));
                return report.advance(RunPhase::NotNeeded);
            }
            Detection::Clean(_) => return report.advance(RunPhase::NotNeeded),
            Detection::Defective(def) => def,
        };
        report.table = source.name.clone();

        let retired = recipe.retired_names();
        let dependents =
            DependentObjectRepairer::new(store).find_dependents(&source.name, retired.as_slice())?;
        let indexes = inspector.indexes(&source.name)?;
        let plan = MigrationPlan::derive(recipe, &source, dependents, indexes, self.config.on_conflict)?
            .ok_or_else(|| MigrationError::InvalidPlan {
                target: recipe.name.clone(),
                reason: "defect no longer present".to_string(),
            })?;
        report.plan = Some(PlanSummary::from(&plan));
        report.advance(RunPhase::Needed)?;

        let missing = inspector.missing_tables(plan.required_tables.as_slice())?;
        if !missing.is_empty() {
            return Err(MigrationError::PreconditionFailed {
                table: plan.table.clone(),
                missing,
            });
        }

        if self.config.dry_run {
            if let Some(summary) = report.plan.as_mut() {
                summary.original_rows = Some(inspector.row_count(&plan.table)?);
                summary.eligible_rows = Some(store.query_i64(&plan.eligible_count_statement())?.max(0) as u64);
            }
            return report.advance(RunPhase::Planned);
        }

        report.advance(RunPhase::BackingUp)?;
        let backup = BackupWriter::new(store, &self.config.backup_dir).snapshot(&plan.table)?;
        report.backup = Some(backup);

        report.advance(RunPhase::RebuildingSchema)?;
        let rebuilt = TableRebuilder::new(store, self.config.shadow_suffix.as_str()).rebuild(&plan)?;
        report.rows_copied = rebuilt.copied_rows;
        report.excluded = Some(ExclusionSummary {
            count: rebuilt.excluded_rows,
            reason: rebuilt.exclusion_reason.clone(),
        });
        report.warnings.extend(rebuilt.warnings.iter().cloned());
        report.rebuild = Some(rebuilt);

        report.advance(RunPhase::RestoringDependents)?;
        let rewrite = (!plan.rewrite.is_empty()).then_some(&plan.rewrite);
        let restored = DependentObjectRepairer::new(store).restore_all(&plan.dependents, rewrite);
        for outcome in &restored {
            if let Some(e) = outcome.to_error() {
                warn!(error = %e, "dependent not restored");
                report.warnings.push(e.to_string());
                report.issues.push(FailureReport::from(&e));
            }
        }
        report.dependents_restored = restored;

        report.advance(RunPhase::Validating)?;
        let scope = match self.config.integrity_scope {
            IntegrityScope::Store => None,
            IntegrityScope::Table => Some(plan.table.as_str()),
        };
        let integrity = IntegrityValidator::new(store).validate(scope);
        let verdict = (!integrity.is_ok()).then(|| MigrationError::IntegrityViolation {
            violations: integrity.violations.len(),
            consistency: integrity.consistency_summary(),
        });
        report.integrity = Some(integrity);
        if let Some(e) = verdict {
            return Err(e);
        }

        report.advance(RunPhase::Succeeded)
    }
}
