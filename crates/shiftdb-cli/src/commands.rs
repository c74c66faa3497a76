use std::io::IsTerminal;

use anyhow::{Context, Result};
use dialoguer::Confirm;
use shiftdb_config::AppConfig;
use shiftdb_db::{MigrationReport, MigrationRunner, MigrationStep, RunnerOptions, SqliteStore, StepStatus};
use tracing::info;

use crate::MigrateAction;
use crate::catalog;

pub fn migrate(action: MigrateAction, config: &AppConfig) -> Result<()> {
    migrate_with(action, config, &catalog::steps())
}

fn migrate_with(action: MigrateAction, config: &AppConfig, steps: &[MigrationStep]) -> Result<()> {
    let store = SqliteStore::open(&config.database.path, &config.database.ledger_table)
        .with_context(|| format!("failed to open {}", config.database.path.display()))?;

    let options = RunnerOptions {
        idempotent_drop: config.migrate.idempotent_drop,
        transactional_steps: config.migrate.transactional_steps,
        repair: false,
    };

    match action {
        MigrateAction::Up { repair } => {
            let runner = MigrationRunner::new(&store, &store, RunnerOptions { repair, ..options });
            let report = runner.apply_pending(steps)?;
            print_report(&report);
        }
        MigrateAction::Down { count, yes } => {
            if !yes && !confirm_rollback(count)? {
                println!("Rollback cancelled.");
                return Ok(());
            }
            let runner = MigrationRunner::new(&store, &store, options);
            let report = runner.rollback(steps, count)?;
            print_report(&report);
        }
        MigrateAction::Status { json } => {
            let runner = MigrationRunner::new(&store, &store, options);
            let statuses = runner.status(steps)?;
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&statuses).context("failed to encode status")?
                );
            } else {
                print_status(&statuses);
            }
        }
        MigrateAction::Mark { version, state } => {
            let runner = MigrationRunner::new(&store, &store, options);
            runner.mark(steps, version, state.into())?;
            println!("Marked {version} as {}.", shiftdb_common::StepState::from(state));
        }
    }
    Ok(())
}

/// Ask before reverting when attached to a terminal; scripts proceed.
fn confirm_rollback(count: usize) -> Result<bool> {
    if !std::io::stdin().is_terminal() {
        info!("non-interactive session, rolling back without confirmation");
        return Ok(true);
    }
    Confirm::new()
        .with_prompt(format!(
            "Roll back {count} migration{}? Data in dropped columns is lost.",
            if count == 1 { "" } else { "s" }
        ))
        .default(false)
        .interact()
        .context("confirmation cancelled")
}

fn print_report(report: &MigrationReport) {
    if report.is_noop() {
        println!("Nothing to do.");
        return;
    }
    for version in &report.applied {
        println!("  applied   {version}");
    }
    for version in &report.reverted {
        println!("  reverted  {version}");
    }
    println!("{} operation(s) executed.", report.operations);
}

fn print_status(statuses: &[StepStatus]) {
    if statuses.is_empty() {
        println!("No migrations.");
        return;
    }
    println!("{:<16} {:<10} {:<26} NAME", "VERSION", "STATE", "APPLIED AT");
    for status in statuses {
        let applied_at = status
            .applied_at
            .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .unwrap_or_else(|| "-".to_string());
        let name = if status.known {
            status.name.clone()
        } else {
            format!("{} (unknown)", status.name)
        };
        println!(
            "{:<16} {:<10} {:<26} {name}",
            status.version.to_string(),
            status.state.as_str(),
            applied_at
        );
    }
}
