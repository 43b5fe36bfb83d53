use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use trackline_backup::ImportMode;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;

use config::CliConfig;

/// trackline: backup, restore and migration tool for trackline databases.
///
/// Export collections to a portable JSON document, validate and upgrade old
/// backups, and restore them into a SQLite database.
#[derive(Parser)]
#[command(name = "trackline", version, about, long_about = None)]
struct Cli {
    /// Config file. Defaults to ./trackline.toml when present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log debug output to stderr (overridden by TRACKLINE_LOG).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show record counts and database details.
    Status {
        /// Path to the SQLite database file.
        db: PathBuf,
    },

    /// Export every collection as a backup document.
    Export {
        /// Path to the SQLite database file.
        db: PathBuf,

        /// Write to a file instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Emit single-line JSON.
        #[arg(long)]
        compact: bool,
    },

    /// Restore a backup document into a database.
    Import {
        /// Path to the SQLite database file.
        db: PathBuf,

        /// Backup document to restore.
        file: PathBuf,

        /// `replace` swaps collection contents, `merge` upserts by id.
        #[arg(short, long)]
        mode: Option<ImportMode>,

        /// Show what would be imported without writing anything.
        #[arg(long)]
        dry_run: bool,

        /// Skip the confirmation prompt for replace imports.
        #[arg(short, long)]
        yes: bool,
    },

    /// Check a backup document and list every issue found.
    Validate {
        /// Backup document to check.
        file: PathBuf,
    },

    /// Upgrade a backup document to the current schema version.
    Migrate {
        /// Backup document to upgrade.
        file: PathBuf,

        /// Write to a file instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Summarize what importing a backup document would do.
    Preview {
        /// Backup document to inspect.
        file: PathBuf,
    },
}

fn init_tracing(verbose: bool) {
    let fallback = if verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("TRACKLINE_LOG").unwrap_or_else(|_| EnvFilter::new(fallback)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match CliConfig::load(cli.config.as_deref()) {
        Ok(config) => run(cli.command, &config).await,
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        process::exit(1);
    }
}

async fn run(command: Commands, config: &CliConfig) -> anyhow::Result<()> {
    match command {
        Commands::Status { db } => commands::status(&db, config),
        Commands::Export {
            db,
            output,
            compact,
        } => commands::export(&db, output.as_deref(), compact, config),
        Commands::Import {
            db,
            file,
            mode,
            dry_run,
            yes,
        } => commands::import(&db, &file, mode, dry_run, yes, config).await,
        Commands::Validate { file } => commands::validate(&file),
        Commands::Migrate { file, output } => commands::migrate(&file, output.as_deref(), config),
        Commands::Preview { file } => commands::preview(&file, config),
    }
}
