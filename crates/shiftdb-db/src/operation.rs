use serde::{Deserialize, Serialize};
use shiftdb_common::{Error, Result};
use tracing::debug;

use crate::backfill::Backfill;
use crate::column::{self, ColumnDef};
use crate::executor::SchemaExecutor;

/// Knobs that change how individual operations behave.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecOptions {
    /// Treat dropping an absent column as success.
    pub idempotent_drop: bool,
}

/// One unit of schema or data change inside a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    AddColumn { table: String, column: ColumnDef },
    RemoveColumn { table: String, column: String },
    BackfillRows(Backfill),
    /// A raw statement for changes the column primitives can't express,
    /// such as creating or dropping a table.
    Execute { sql: String },
}

impl Operation {
    pub fn add_column(table: impl Into<String>, column: ColumnDef) -> Self {
        Operation::AddColumn {
            table: table.into(),
            column,
        }
    }

    pub fn remove_column(table: impl Into<String>, column: impl Into<String>) -> Self {
        Operation::RemoveColumn {
            table: table.into(),
            column: column.into(),
        }
    }

    pub fn backfill(backfill: Backfill) -> Self {
        Operation::BackfillRows(backfill)
    }

    pub fn execute(sql: impl Into<String>) -> Self {
        Operation::Execute { sql: sql.into() }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            Operation::AddColumn { table, column } => column.validate(table),
            Operation::RemoveColumn { table, column } if column.trim().is_empty() => Err(
                Error::InvalidStep(format!("drop on table {table} has an empty column name")),
            ),
            Operation::RemoveColumn { .. } => Ok(()),
            Operation::BackfillRows(backfill) => backfill.validate(),
            Operation::Execute { sql } if sql.trim().is_empty() => {
                Err(Error::InvalidStep("empty statement".into()))
            }
            Operation::Execute { .. } => Ok(()),
        }
    }

    /// Short human-readable description for logs and status output.
    pub fn describe(&self) -> String {
        match self {
            Operation::AddColumn { table, column } => {
                format!("add column {table}.{}", column.name)
            }
            Operation::RemoveColumn { table, column } => format!("drop column {table}.{column}"),
            Operation::BackfillRows(b) => format!("backfill {}", b.table),
            Operation::Execute { sql } => {
                let first = sql.trim().lines().next().unwrap_or_default();
                format!("execute `{first}`")
            }
        }
    }

    pub fn run(&self, executor: &dyn SchemaExecutor, options: &ExecOptions) -> Result<()> {
        debug!("{}", self.describe());
        match self {
            Operation::AddColumn { table, column } => column::add_column(executor, table, column),
            Operation::RemoveColumn { table, column } => {
                column::drop_column(executor, table, column, options.idempotent_drop).map(|_| ())
            }
            Operation::BackfillRows(backfill) => backfill.apply(executor).map(|_| ()),
            Operation::Execute { sql } => executor.execute_statement(sql),
        }
    }
}
