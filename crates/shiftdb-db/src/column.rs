use serde::{Deserialize, Serialize};
use shiftdb_common::{Error, Result};
use tracing::{info, warn};

use crate::executor::SchemaExecutor;

/// Column types a step may declare. Backends map them to their own DDL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "length", rename_all = "snake_case")]
pub enum DataType {
    Boolean,
    /// Bounded string of at most `n` characters.
    String(u32),
    Text,
    /// Date and time of day.
    Date,
}

/// Literal used for column defaults and backfill assignments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    Null,
    Bool(bool),
    Integer(i64),
    Text(String),
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub data_type: DataType,
    pub nullable: bool,
    pub default: Option<Value>,
}

impl ColumnDef {
    /// A nullable column without a default.
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable: true,
            default: None,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn validate(&self, table: &str) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::InvalidStep(format!(
                "column on table {table} has an empty name"
            )));
        }
        if self.data_type == DataType::String(0) {
            return Err(Error::InvalidStep(format!(
                "column {table}.{} declares a zero-length string",
                self.name
            )));
        }
        // Existing rows need a value for a NOT NULL column.
        if !self.nullable && matches!(self.default, None | Some(Value::Null)) {
            return Err(Error::InvalidStep(format!(
                "column {table}.{} is NOT NULL but has no default",
                self.name
            )));
        }
        Ok(())
    }
}

/// Add `column` to `table`, failing if a column with that name is present.
pub fn add_column(executor: &dyn SchemaExecutor, table: &str, column: &ColumnDef) -> Result<()> {
    if executor.has_column(table, &column.name)? {
        return Err(Error::ColumnAlreadyExists {
            table: table.to_string(),
            column: column.name.clone(),
        });
    }
    executor.add_column(table, column)?;
    info!("added column {table}.{}", column.name);
    Ok(())
}

/// Drop `column` from `table`. Any data stored in it is lost.
///
/// Returns whether a column was dropped. An absent column is an error unless
/// `idempotent` is set.
pub fn drop_column(
    executor: &dyn SchemaExecutor,
    table: &str,
    column: &str,
    idempotent: bool,
) -> Result<bool> {
    if !executor.has_column(table, column)? {
        if idempotent {
            warn!("column {table}.{column} already absent, skipping drop");
            return Ok(false);
        }
        return Err(Error::ColumnNotFound {
            table: table.to_string(),
            column: column.to_string(),
        });
    }
    executor.remove_column(table, column)?;
    info!("dropped column {table}.{column}");
    Ok(true)
}
