use std::io::IsTerminal;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use dialoguer::{Confirm, Input};
use shiftdb_config::{AppConfig, write_file};

/// Write a default config to `target`, asking for the database path when
/// run interactively. The format follows the file extension.
pub fn run_init(target: &Path, force: bool) -> Result<()> {
    ensure_writable(target, force)?;

    let mut config = AppConfig::default();

    if std::io::stdin().is_terminal() {
        let path: String = Input::new()
            .with_prompt("Database file")
            .default(config.database.path.display().to_string())
            .interact_text()
            .context("database path input cancelled")?;
        config.database.path = PathBuf::from(path.trim());

        config.migrate.idempotent_drop = Confirm::new()
            .with_prompt("Treat dropping an already-missing column as success?")
            .default(false)
            .interact()
            .context("idempotent drop choice cancelled")?;
    }

    write_config(target, &config)
}

fn ensure_writable(target: &Path, force: bool) -> Result<()> {
    if target.exists() && !force {
        bail!(
            "config already exists at {} (pass --force to overwrite)",
            target.display()
        );
    }
    Ok(())
}

fn write_config(target: &Path, config: &AppConfig) -> Result<()> {
    write_file(target, config)
        .with_context(|| format!("failed to write config to {}", target.display()))?;

    println!();
    println!("  Config written to {}", target.display());
    println!("  Run `shiftdb migrate up` to apply pending migrations.");
    println!();

    Ok(())
}
