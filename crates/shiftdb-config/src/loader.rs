use std::path::{Path, PathBuf};

use shiftdb_common::{Error, Result};
use tracing::{debug, info};

use crate::model::AppConfig;

const CONFIG_FILE_NAMES: [&str; 3] = ["shiftdb.yml", "shiftdb.yaml", "shiftdb.toml"];

/// Locates and parses the shiftdb configuration, then layers environment
/// overrides on top.
pub struct ConfigLoader {
    config_dir: PathBuf,
}

impl ConfigLoader {
    pub fn new(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
        }
    }

    /// `~/.config/shiftdb` (or the platform equivalent), falling back to the
    /// working directory when no config dir is known.
    pub fn default_dir() -> PathBuf {
        dirs::config_dir()
            .map(|d| d.join("shiftdb"))
            .unwrap_or_else(|| PathBuf::from("."))
    }

    pub fn find_config_file(&self) -> Option<PathBuf> {
        CONFIG_FILE_NAMES
            .iter()
            .map(|name| self.config_dir.join(name))
            .find(|p| p.is_file())
    }

    /// The existing config file, or where `shiftdb.yml` would go.
    pub fn config_file(&self) -> PathBuf {
        self.find_config_file()
            .unwrap_or_else(|| self.config_dir.join(CONFIG_FILE_NAMES[0]))
    }

    /// Load the config file from the config dir (defaults when absent), then
    /// apply `.env` and `SHIFTDB_*` environment overrides.
    pub fn load(&self) -> Result<AppConfig> {
        match self.find_config_file() {
            Some(path) => Self::load_from(&path),
            None => {
                debug!(
                    "no config file in {}, using defaults",
                    self.config_dir.display()
                );
                with_env(AppConfig::default())
            }
        }
    }

    /// Load an explicit config file, then apply environment overrides.
    pub fn load_from(path: &Path) -> Result<AppConfig> {
        info!("loading config from {}", path.display());
        with_env(load_file(path)?)
    }
}

fn with_env(mut config: AppConfig) -> Result<AppConfig> {
    let _ = dotenvy::dotenv();
    apply_overrides(&mut config, |key| std::env::var(key).ok())?;
    Ok(config)
}

/// Parse a single config file, choosing the format by extension.
pub fn load_file(path: &Path) -> Result<AppConfig> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;

    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    match ext {
        "yml" | "yaml" => serde_yaml::from_str(&contents)
            .map_err(|e| Error::Config(format!("YAML parse error in {}: {e}", path.display()))),
        "toml" => toml::from_str(&contents)
            .map_err(|e| Error::Config(format!("TOML parse error in {}: {e}", path.display()))),
        other => Err(Error::Config(format!(
            "unsupported config extension: {other}"
        ))),
    }
}

/// Serialize `config` to `path`, choosing the format by extension and
/// creating parent directories as needed.
pub fn write_file(path: &Path, config: &AppConfig) -> Result<()> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    let contents = match ext {
        "yml" | "yaml" => serde_yaml::to_string(config)
            .map_err(|e| Error::Config(format!("failed to serialize config: {e}")))?,
        "toml" => toml::to_string(config)
            .map_err(|e| Error::Config(format!("failed to serialize config: {e}")))?,
        other => {
            return Err(Error::Config(format!(
                "unsupported config extension: {other}"
            )));
        }
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, contents)?;
    info!("config written to {}", path.display());
    Ok(())
}

/// Apply `SHIFTDB_*` overrides read through `lookup`.
pub fn apply_overrides<F>(config: &mut AppConfig, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(path) = lookup("SHIFTDB_DATABASE") {
        config.database.path = PathBuf::from(path);
    }
    if let Some(table) = lookup("SHIFTDB_LEDGER_TABLE") {
        config.database.ledger_table = table;
    }
    if let Some(v) = lookup("SHIFTDB_IDEMPOTENT_DROP") {
        config.migrate.idempotent_drop = parse_bool("SHIFTDB_IDEMPOTENT_DROP", &v)?;
    }
    if let Some(v) = lookup("SHIFTDB_TRANSACTIONAL_STEPS") {
        config.migrate.transactional_steps = parse_bool("SHIFTDB_TRANSACTIONAL_STEPS", &v)?;
    }
    if let Some(level) = lookup("SHIFTDB_LOG_LEVEL") {
        config.log.level = level;
    }
    Ok(())
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(Error::Config(format!(
            "{key} must be a boolean, got '{other}'"
        ))),
    }
}
