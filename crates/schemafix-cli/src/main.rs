//! Schemafix command-line tool
//!
//! Inspects, backs up, checks, and repairs SQLite tables using the
//! built-in recipes.

mod commands;
mod config;
mod error;
mod formatter;
mod presets;

use clap::Parser;
use schemafix_core::SqliteStore;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use commands::CommandOutput;
use config::{Args, Command};
use error::CliError;
use formatter::{create_formatter, Formatter};

fn main() {
    // Logs go to stderr; stdout carries command output
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "schemafix=info,schemafix_core=info".into()),
        )
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let formatter = create_formatter(args.format);

    let status = match execute(&args, &*formatter) {
        Ok(output) => {
            println!("{}", output.text);
            output.status
        }
        Err(e) => {
            eprintln!("{}", formatter.format_error(&e.to_string()));
            e.exit_status()
        }
    };

    std::process::exit(status.code());
}

fn execute(args: &Args, formatter: &dyn Formatter) -> Result<CommandOutput, CliError> {
    if !args.command.needs_store() {
        return Ok(commands::list_presets(formatter));
    }

    let store = SqliteStore::open(&args.to_store_config()).map_err(|source| CliError::Open {
        path: args.db.clone(),
        source,
    })?;

    match &args.command {
        Command::Inspect { table } => commands::inspect(&store, table, formatter),
        Command::Check { table } => commands::check(&store, table.as_deref(), formatter),
        Command::Backup { table, backup_dir } => {
            commands::backup(&store, table, backup_dir, formatter)
        }
        Command::Presets => Ok(commands::list_presets(formatter)),
        Command::Run { preset, .. } => {
            commands::run(&store, preset, args.to_migration_config(), formatter)
        }
        Command::Restore { file } => commands::restore(&store, file, formatter),
    }
}
