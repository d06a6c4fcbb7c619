//! Run state machine.
//!
//! A run moves through detection, backup, rebuild, dependent restore, and
//! validation. Every transition is recorded with a timestamp so reports can
//! show how far a failed run got.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::error::MigrationError;

/// Phase of a migration run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    /// Inspecting the table for the defect.
    Detecting,
    /// The defect is absent. Terminal.
    NotNeeded,
    /// The defect is present and a plan was derived.
    Needed,
    /// Dry run: the plan was derived and nothing was changed. Terminal.
    Planned,
    /// Writing the pre-migration backup.
    BackingUp,
    /// Shadow-table rebuild in progress.
    RebuildingSchema,
    /// Recreating dependent views, indexes, and triggers.
    RestoringDependents,
    /// Running integrity checks.
    Validating,
    /// Migration completed and validated. Terminal.
    Succeeded,
    /// Migration stopped. Terminal.
    Failed,
}

impl RunPhase {
    /// Check if the phase is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunPhase::NotNeeded | RunPhase::Planned | RunPhase::Succeeded | RunPhase::Failed
        )
    }

    /// Whether the run may move from this phase to `next`.
    pub fn can_transition_to(&self, next: RunPhase) -> bool {
        use RunPhase::*;
        match (self, next) {
            (_, Failed) => !self.is_terminal(),
            (Detecting, NotNeeded) | (Detecting, Needed) => true,
            (Needed, Planned) | (Needed, BackingUp) => true,
            (BackingUp, RebuildingSchema) => true,
            (RebuildingSchema, RestoringDependents) => true,
            (RestoringDependents, Validating) => true,
            (Validating, Succeeded) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for RunPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunPhase::Detecting => write!(f, "detecting"),
            RunPhase::NotNeeded => write!(f, "not_needed"),
            RunPhase::Needed => write!(f, "needed"),
            RunPhase::Planned => write!(f, "planned"),
            RunPhase::BackingUp => write!(f, "backing_up"),
            RunPhase::RebuildingSchema => write!(f, "rebuilding_schema"),
            RunPhase::RestoringDependents => write!(f, "restoring_dependents"),
            RunPhase::Validating => write!(f, "validating"),
            RunPhase::Succeeded => write!(f, "succeeded"),
            RunPhase::Failed => write!(f, "failed"),
        }
    }
}

/// A recorded phase change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhaseTransition {
    /// Phase entered.
    pub phase: RunPhase,
    /// When it was entered.
    pub at: DateTime<Utc>,
}

/// State of a single run.
#[derive(Debug, Clone, Serialize)]
pub struct RunState {
    /// Current phase.
    pub phase: RunPhase,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run reached a terminal phase.
    pub completed_at: Option<DateTime<Utc>>,
    /// Error message if the run failed.
    pub error: Option<String>,
    /// Every phase entered, in order, starting with detection.
    pub history: Vec<PhaseTransition>,
}

impl RunState {
    /// Create a run in the detecting phase.
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            phase: RunPhase::Detecting,
            started_at: now,
            completed_at: None,
            error: None,
            history: vec![PhaseTransition {
                phase: RunPhase::Detecting,
                at: now,
            }],
        }
    }

    /// Move to `next`, rejecting out-of-order transitions.
    pub fn advance(&mut self, next: RunPhase) -> Result<(), MigrationError> {
        if !self.phase.can_transition_to(next) {
            return Err(MigrationError::IllegalTransition {
                from: self.phase,
                to: next,
            });
        }
        let now = Utc::now();
        self.phase = next;
        self.history.push(PhaseTransition { phase: next, at: now });
        if next.is_terminal() {
            self.completed_at = Some(now);
        }
        Ok(())
    }

    /// Mark the run as failed. No-op once terminal.
    pub fn fail(&mut self, error: impl Into<String>) {
        if self.phase.is_terminal() {
            return;
        }
        self.error = Some(error.into());
        let now = Utc::now();
        self.phase = RunPhase::Failed;
        self.history.push(PhaseTransition {
            phase: RunPhase::Failed,
            at: now,
        });
        self.completed_at = Some(now);
    }

    /// Check if the run is in a terminal phase.
    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }

    /// The last non-terminal phase reached, i.e. where a failed run stopped.
    pub fn last_active_phase(&self) -> RunPhase {
        self.history
            .iter()
            .rev()
            .map(|t| t.phase)
            .find(|p| !p.is_terminal())
            .unwrap_or(RunPhase::Detecting)
    }

    /// Phases entered, in order.
    pub fn phases(&self) -> Vec<RunPhase> {
        self.history.iter().map(|t| t.phase).collect()
    }
}

impl Default for RunState {
    fn default() -> Self {
        Self::new()
    }
}
