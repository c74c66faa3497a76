use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use shiftdb_common::DEFAULT_LEDGER_TABLE;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub migrate: MigrateConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite database file the migrations run against.
    pub path: PathBuf,
    /// Table holding the applied-versions ledger.
    pub ledger_table: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("shiftdb.sqlite3"),
            ledger_table: DEFAULT_LEDGER_TABLE.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrateConfig {
    /// Skip (rather than fail on) dropping a column that is already gone.
    pub idempotent_drop: bool,
    /// Run each step's operations inside a single transaction.
    pub transactional_steps: bool,
}

impl Default for MigrateConfig {
    fn default() -> Self {
        Self {
            idempotent_drop: false,
            transactional_steps: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
