//! Post-migration integrity validation.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info};

use crate::store::{ConsistencyStatus, ReferentialViolation, RelationalStore};

/// Overall verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrityStatus {
    Ok,
    Failed,
}

impl std::fmt::Display for IntegrityStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IntegrityStatus::Ok => write!(f, "ok"),
            IntegrityStatus::Failed => write!(f, "failed"),
        }
    }
}

/// How much of the store the referential check covers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrityScope {
    /// Every table.
    #[default]
    Store,
    /// Only the migrated table.
    Table,
}

impl std::str::FromStr for IntegrityScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "store" => Ok(IntegrityScope::Store),
            "table" => Ok(IntegrityScope::Table),
            other => Err(format!("unknown integrity scope: {}", other)),
        }
    }
}

/// Result of a validation pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IntegrityReport {
    pub status: IntegrityStatus,
    pub consistency: ConsistencyStatus,
    pub violations: Vec<ReferentialViolation>,
    /// Table the referential check was limited to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    pub checked_at: DateTime<Utc>,
}

impl IntegrityReport {
    pub fn is_ok(&self) -> bool {
        self.status == IntegrityStatus::Ok
    }

    /// Short verdict for the physical check.
    pub fn consistency_summary(&self) -> String {
        match &self.consistency {
            ConsistencyStatus::Ok => "ok".to_string(),
            ConsistencyStatus::Corrupted(problems) => format!("{} problem(s)", problems.len()),
        }
    }
}

/// Runs physical and referential checks.
pub struct IntegrityValidator<'a> {
    store: &'a dyn RelationalStore,
}

impl<'a> IntegrityValidator<'a> {
    pub fn new(store: &'a dyn RelationalStore) -> Self {
        Self { store }
    }

    /// Physical consistency of the whole store. A check that cannot run is
    /// reported as corruption.
    pub fn check_consistency(&self) -> ConsistencyStatus {
        match self.store.check_consistency() {
            Ok(status) => status,
            Err(e) => ConsistencyStatus::Corrupted(vec![format!("consistency check failed: {}", e)]),
        }
    }

    /// Referential violations in `table`, or in every table when `None`.
    pub fn check_referential_integrity(
        &self,
        table: Option<&str>,
    ) -> Result<Vec<ReferentialViolation>, crate::error::Error> {
        self.store.check_referential_integrity(table)
    }

    /// Run both checks. `Ok` only when the store is consistent and no
    /// violation is found.
    pub fn validate(&self, table: Option<&str>) -> IntegrityReport {
        let mut consistency = self.check_consistency();
        let violations = match self.check_referential_integrity(table) {
            Ok(violations) => violations,
            Err(e) => {
                let problem = format!("referential check failed: {}", e);
                consistency = match consistency {
                    ConsistencyStatus::Ok => ConsistencyStatus::Corrupted(vec![problem]),
                    ConsistencyStatus::Corrupted(mut problems) => {
                        problems.push(problem);
                        ConsistencyStatus::Corrupted(problems)
                    }
                };
                Vec::new()
            }
        };

        let status = if consistency.is_ok() && violations.is_empty() {
            IntegrityStatus::Ok
        } else {
            IntegrityStatus::Failed
        };

        match status {
            IntegrityStatus::Ok => info!(table = ?table, "integrity ok"),
            IntegrityStatus::Failed => error!(
                table = ?table,
                violations = violations.len(),
                consistent = consistency.is_ok(),
                "integrity check failed"
            ),
        }

        IntegrityReport {
            status,
            consistency,
            violations,
            table: table.map(str::to_string),
            checked_at: Utc::now(),
        }
    }
}
