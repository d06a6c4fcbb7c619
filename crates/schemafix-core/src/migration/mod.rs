//! Schema repair engine.
//!
//! A migration corrects one table whose stored structure has a known
//! defect, without silent data loss:
//! - Structural defect detection on the parsed definition
//! - Verified, replayable backup before any destructive step
//! - Shadow-table rebuild with filtered copy and atomic swap, in one
//!   transaction
//! - Best-effort recreation of dependent views, indexes, and triggers
//! - Post-commit consistency and referential audit
//!
//! # Run phases
//!
//! | Phase | Failure effect |
//! |-------|----------------|
//! | **Detecting** | Nothing written; a clean or missing table ends as `NotNeeded` |
//! | **BackingUp** | Nothing written; partial backup file removed |
//! | **RebuildingSchema** | Transaction rolled back; original table intact |
//! | **RestoringDependents** | Reported per object; does not fail the run |
//! | **Validating** | Run fails; data already changed, restore from backup |
//!
//! # Example
//!
//! ```ignore
//! use schemafix_core::migration::{
//!     DefectPattern, MigrationConfig, MigrationRecipe, MigrationRunner, RowFilter, SchemaChange,
//! };
//!
//! let recipe = MigrationRecipe::new(
//!     "fix-user-roles-fk",
//!     "user_roles",
//!     DefectPattern::foreign_key_targets("users_legacy_backup"),
//! )
//! .with_change(SchemaChange::retarget_foreign_key("users_legacy_backup", "users"))
//! .with_row_filter(RowFilter::reference_exists("user_id", "users", "id"));
//!
//! let report = MigrationRunner::new(&store, MigrationConfig::default()).run(&recipe);
//! println!("{}: copied {}", report.outcome, report.rows_copied);
//! ```

pub mod backup;
pub mod change;
pub mod dependents;
pub mod error;
pub mod filter;
pub mod inspector;
pub mod integrity;
pub mod pattern;
pub mod plan;
pub mod rebuild;
pub mod runner;
pub mod state;

// Definition-level types
pub use change::SchemaChange;
pub use filter::RowFilter;
pub use pattern::DefectPattern;
pub use plan::{ColumnMapping, ColumnSource, ConflictPolicy, MigrationPlan, MigrationRecipe};

// Error types
pub use error::{FailureCategory, MigrationError};

// Components
pub use backup::{restore_backup, BackupRecord, BackupWriter, RestoreSummary, DEFAULT_BACKUP_DIR};
pub use dependents::{
    DependentObject, DependentObjectRepairer, ObjectAction, ObjectOutcome, RewriteRule,
};
pub use inspector::{Detection, IndexDef, SchemaInspector};
pub use integrity::{IntegrityReport, IntegrityScope, IntegrityStatus, IntegrityValidator};
pub use rebuild::{RebuildOutcome, RebuildPhase, TableRebuilder, DEFAULT_SHADOW_SUFFIX};

// Orchestration
pub use runner::{
    ExclusionSummary, FailureReport, MigrationConfig, MigrationReport, MigrationRunner, Outcome,
    PlanSummary,
};
pub use state::{PhaseTransition, RunPhase, RunState};
