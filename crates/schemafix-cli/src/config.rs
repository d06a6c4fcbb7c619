//! Command-line arguments.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use schemafix_core::migration::{IntegrityScope, MigrationConfig, DEFAULT_BACKUP_DIR};
use schemafix_core::StoreConfig;

use crate::formatter::OutputFormat;

/// Default database path.
pub const DEFAULT_DB_PATH: &str = "data/qa_intelligence.db";

/// Default busy timeout in milliseconds.
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5000;

/// Schemafix: repair SQLite table structure in place.
#[derive(Parser, Debug)]
#[command(name = "schemafix")]
#[command(version, about = "Schema repair engine for SQLite", long_about = None)]
pub struct Args {
    /// Path to the SQLite database.
    #[arg(long, global = true, default_value = DEFAULT_DB_PATH)]
    pub db: PathBuf,

    /// How long to wait on a locked database, in milliseconds.
    #[arg(long, global = true, default_value_t = DEFAULT_BUSY_TIMEOUT_MS)]
    pub busy_timeout_ms: u64,

    /// Output format.
    #[arg(long, global = true, default_value = "table", value_enum)]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show a table's structured definition, indexes, and dependents.
    Inspect {
        table: String,
    },
    /// Run consistency and referential integrity checks.
    Check {
        /// Limit the referential check to one table.
        #[arg(long)]
        table: Option<String>,
    },
    /// Write a backup of one table.
    Backup {
        table: String,
        #[arg(long, default_value = DEFAULT_BACKUP_DIR)]
        backup_dir: PathBuf,
    },
    /// List built-in recipes.
    Presets,
    /// Run a built-in recipe.
    Run {
        preset: String,
        #[arg(long, default_value = DEFAULT_BACKUP_DIR)]
        backup_dir: PathBuf,
        /// Detect and plan without writing anything.
        #[arg(long)]
        dry_run: bool,
        /// Scope of the post-migration referential check.
        #[arg(long, default_value = "store", value_enum)]
        scope: ScopeArg,
    },
    /// Replay a backup file, replacing the table it contains.
    Restore {
        file: PathBuf,
    },
}

/// Integrity scope as given on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ScopeArg {
    Store,
    Table,
}

impl From<ScopeArg> for IntegrityScope {
    fn from(scope: ScopeArg) -> Self {
        match scope {
            ScopeArg::Store => IntegrityScope::Store,
            ScopeArg::Table => IntegrityScope::Table,
        }
    }
}

impl Args {
    /// Store configuration. Commands that only read open the store
    /// read-only.
    pub fn to_store_config(&self) -> StoreConfig {
        let config = StoreConfig::new(&self.db)
            .with_busy_timeout(Duration::from_millis(self.busy_timeout_ms));
        if self.command.is_read_only() {
            config.read_only()
        } else {
            config
        }
    }

    /// Runner configuration for `run`; defaults for other commands.
    pub fn to_migration_config(&self) -> MigrationConfig {
        match &self.command {
            Command::Run {
                backup_dir,
                dry_run,
                scope,
                ..
            } => MigrationConfig::default()
                .with_backup_dir(backup_dir)
                .dry_run(*dry_run)
                .with_integrity_scope((*scope).into()),
            _ => MigrationConfig::default(),
        }
    }
}

impl Command {
    pub fn is_read_only(&self) -> bool {
        match self {
            Command::Inspect { .. } | Command::Check { .. } | Command::Presets => true,
            Command::Run { dry_run, .. } => *dry_run,
            Command::Backup { .. } | Command::Restore { .. } => false,
        }
    }

    /// Whether the command needs a database at all.
    pub fn needs_store(&self) -> bool {
        !matches!(self, Command::Presets)
    }
}
