//! Migration-specific error types.

use serde::Serialize;
use thiserror::Error;

use super::rebuild::RebuildPhase;
use super::state::RunPhase;
use crate::store::ObjectKind;

/// Failure category reported to operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    /// A referenced table the corrected definition needs is absent.
    PreconditionFailed,
    /// The backup could not be written or verified.
    BackupFailed,
    /// The transactional rebuild failed and was rolled back.
    RebuildFailed,
    /// A dropped view, index, or trigger could not be recreated.
    DependentRestoreFailed,
    /// Post-migration validation found problems.
    IntegrityViolation,
    /// The recipe cannot produce a usable corrected definition.
    InvalidPlan,
    /// The store failed outside any migration phase.
    Store,
}

impl std::fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureCategory::PreconditionFailed => write!(f, "precondition_failed"),
            FailureCategory::BackupFailed => write!(f, "backup_failed"),
            FailureCategory::RebuildFailed => write!(f, "rebuild_failed"),
            FailureCategory::DependentRestoreFailed => write!(f, "dependent_restore_failed"),
            FailureCategory::IntegrityViolation => write!(f, "integrity_violation"),
            FailureCategory::InvalidPlan => write!(f, "invalid_plan"),
            FailureCategory::Store => write!(f, "store"),
        }
    }
}

/// Migration-specific errors.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// Tables the corrected definition depends on do not exist.
    #[error("precondition failed for {table}: missing table(s) {}", missing.join(", "))]
    PreconditionFailed {
        /// The table being migrated.
        table: String,
        /// Required tables that were not found.
        missing: Vec<String>,
    },

    /// Backup could not be written, flushed, or verified.
    #[error("backup of {table} failed: {reason}")]
    BackupFailed {
        /// The table being backed up.
        table: String,
        /// The reason for failure.
        reason: String,
    },

    /// The rebuild transaction failed; nothing was changed.
    #[error("rebuild of {table} failed during {phase}: {message}")]
    RebuildFailed {
        /// The table being rebuilt.
        table: String,
        /// The phase that failed.
        phase: RebuildPhase,
        /// Error message.
        message: String,
    },

    /// A dependent object could not be recreated after the rebuild.
    #[error("could not restore {kind} {name}: {reason}")]
    DependentRestoreFailed {
        /// Kind of the dependent object.
        kind: ObjectKind,
        /// Name of the dependent object.
        name: String,
        /// The reason restore failed.
        reason: String,
    },

    /// Validation after the migration found problems.
    #[error("integrity check failed: {violations} referential violation(s), consistency {consistency}")]
    IntegrityViolation {
        /// Number of referential violations.
        violations: usize,
        /// Physical consistency verdict.
        consistency: String,
    },

    /// The recipe does not yield a valid corrected definition.
    #[error("invalid plan for {target}: {reason}")]
    InvalidPlan {
        /// The recipe or table the plan was derived for.
        target: String,
        /// Why the plan is unusable.
        reason: String,
    },

    /// The run tried to move between phases out of order.
    #[error("illegal transition from {from} to {to}")]
    IllegalTransition {
        /// Current phase.
        from: RunPhase,
        /// Requested phase.
        to: RunPhase,
    },

    /// Store error outside a specific phase.
    #[error(transparent)]
    Store(#[from] crate::error::Error),
}

impl MigrationError {
    /// Category reported to operators.
    pub fn category(&self) -> FailureCategory {
        match self {
            MigrationError::PreconditionFailed { .. } => FailureCategory::PreconditionFailed,
            MigrationError::BackupFailed { .. } => FailureCategory::BackupFailed,
            MigrationError::RebuildFailed { .. } => FailureCategory::RebuildFailed,
            MigrationError::DependentRestoreFailed { .. } => FailureCategory::DependentRestoreFailed,
            MigrationError::IntegrityViolation { .. } => FailureCategory::IntegrityViolation,
            MigrationError::InvalidPlan { .. } | MigrationError::IllegalTransition { .. } => {
                FailureCategory::InvalidPlan
            }
            MigrationError::Store(_) => FailureCategory::Store,
        }
    }

    /// The entity the failure is about, when there is one.
    pub fn entity(&self) -> Option<String> {
        match self {
            MigrationError::PreconditionFailed { missing, .. } => Some(missing.join(", ")),
            MigrationError::BackupFailed { table, .. } | MigrationError::RebuildFailed { table, .. } => {
                Some(table.clone())
            }
            MigrationError::DependentRestoreFailed { kind, name, .. } => {
                Some(format!("{} {}", kind, name))
            }
            MigrationError::InvalidPlan { target, .. } => Some(target.clone()),
            MigrationError::IntegrityViolation { .. }
            | MigrationError::IllegalTransition { .. }
            | MigrationError::Store(_) => None,
        }
    }
}

impl From<rusqlite::Error> for MigrationError {
    fn from(e: rusqlite::Error) -> Self {
        MigrationError::Store(e.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MigrationError::PreconditionFailed {
            table: "user_roles".to_string(),
            missing: vec!["users".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "precondition failed for user_roles: missing table(s) users"
        );
        assert_eq!(err.category(), FailureCategory::PreconditionFailed);
        assert_eq!(err.entity().as_deref(), Some("users"));

        let err = MigrationError::RebuildFailed {
            table: "user_roles".to_string(),
            phase: RebuildPhase::FilteredCopy,
            message: "constraint failed".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "rebuild of user_roles failed during filtered_copy: constraint failed"
        );
        assert_eq!(err.category().to_string(), "rebuild_failed");
    }
}
