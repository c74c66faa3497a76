mod catalog;
mod commands;
mod init;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use shiftdb_common::{StepState, Version};
use shiftdb_config::{AppConfig, ConfigLoader};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "shiftdb", version, about = "Apply and roll back versioned schema migrations")]
struct Cli {
    /// Config file (default: shiftdb.yml in the user config dir)
    #[arg(long, global = true, env = "SHIFTDB_CONFIG")]
    config: Option<PathBuf>,

    /// Database file, overriding the config
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    /// Log filter when RUST_LOG is unset, e.g. `debug` or `shiftdb_db=trace`
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Apply, roll back or inspect migrations
    Migrate {
        #[command(subcommand)]
        action: MigrateAction,
    },
    /// Write a default config file
    Init {
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum MigrateAction {
    /// Apply every pending migration
    Up {
        /// Allow applying migrations older than the latest applied one
        #[arg(long)]
        repair: bool,
    },
    /// Roll back the most recently applied migrations
    Down {
        #[arg(default_value_t = 1)]
        count: usize,
        /// Skip the confirmation prompt
        #[arg(long, short)]
        yes: bool,
    },
    /// Show the state of every migration
    Status {
        #[arg(long)]
        json: bool,
    },
    /// Settle a migration's ledger entry after fixing the schema by hand
    Mark { version: Version, state: MarkState },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum MarkState {
    Applied,
    Pending,
}

impl From<MarkState> for StepState {
    fn from(state: MarkState) -> Self {
        match state {
            MarkState::Applied => StepState::Applied,
            MarkState::Pending => StepState::Pending,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => report_failure(&e),
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Init { force } => {
            init_tracing(cli.log_level.as_deref().unwrap_or("info"), cli.json_logs);
            init::run_init(&init_target(&cli), force)
        }
        Command::Migrate { ref action } => {
            let config = load_config(&cli)?;
            init_tracing(&config.log.level, config.log.json);
            commands::migrate(action.clone(), &config)
        }
    }
}

/// `--config` names the file to create; otherwise the default location.
fn init_target(cli: &Cli) -> PathBuf {
    match &cli.config {
        Some(path) => path.clone(),
        None => ConfigLoader::new(ConfigLoader::default_dir()).config_file(),
    }
}

fn load_config(cli: &Cli) -> Result<AppConfig> {
    let mut config = match &cli.config {
        Some(path) => ConfigLoader::load_from(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => ConfigLoader::new(ConfigLoader::default_dir())
            .load()
            .context("failed to load config")?,
    };

    if let Some(database) = &cli.database {
        config.database.path = database.clone();
    }
    if let Some(level) = &cli.log_level {
        config.log.level = level.clone();
    }
    config.log.json |= cli.json_logs;
    Ok(config)
}

fn init_tracing(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.with_target(false).init();
    }
}

/// Print the failing version and error kind.
fn report_failure(err: &anyhow::Error) -> ExitCode {
    match err.downcast_ref::<shiftdb_common::Error>() {
        Some(e) => match e.failed_version() {
            Some(version) => eprintln!("error: migration {version} failed [{}]: {e}", e.kind()),
            None => eprintln!("error [{}]: {err:#}", e.kind()),
        },
        None => eprintln!("error: {err:#}"),
    }
    ExitCode::from(failure_code(err))
}

/// 2 when the ledger needs an operator, 1 for every other failure.
fn failure_code(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<shiftdb_common::Error>() {
        Some(e) if e.kind() == "InconsistentLedgerState" => 2,
        _ => 1,
    }
}
