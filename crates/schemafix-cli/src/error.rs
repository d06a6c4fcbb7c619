//! CLI error type.

use std::path::PathBuf;

use schemafix_core::MigrationError;
use thiserror::Error;

use crate::commands::ExitStatus;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("cannot open {}: {source}", path.display())]
    Open {
        path: PathBuf,
        source: schemafix_core::Error,
    },

    #[error("unknown preset '{0}' (see `schemafix presets`)")]
    UnknownPreset(String),

    #[error("table {0} does not exist")]
    TableNotFound(String),

    #[error(transparent)]
    Store(#[from] schemafix_core::Error),

    #[error(transparent)]
    Migration(#[from] MigrationError),
}

impl CliError {
    pub fn exit_status(&self) -> ExitStatus {
        match self {
            CliError::Open { .. } | CliError::UnknownPreset(_) => ExitStatus::Usage,
            CliError::TableNotFound(_) | CliError::Store(_) | CliError::Migration(_) => {
                ExitStatus::Failed
            }
        }
    }
}
