use serde::{Deserialize, Serialize};
use shiftdb_common::{Error, Result};
use tracing::info;

use crate::column::Value;
use crate::executor::SchemaExecutor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    pub fn as_sql(self) -> &'static str {
        match self {
            CmpOp::Eq => "=",
            CmpOp::Ne => "<>",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operand {
    Value(Value),
    /// Wall-clock time of the database, read once for the whole statement.
    Now,
}

/// Row filter for a backfill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    All,
    IsNull(String),
    IsNotNull(String),
    Compare {
        column: String,
        op: CmpOp,
        operand: Operand,
    },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
}

impl Predicate {
    pub fn compare(column: impl Into<String>, op: CmpOp, operand: Operand) -> Self {
        Predicate::Compare {
            column: column.into(),
            op,
            operand,
        }
    }

    /// `column < now`, the usual "rows that existed before this migration".
    pub fn before_now(column: impl Into<String>) -> Self {
        Self::compare(column, CmpOp::Lt, Operand::Now)
    }
}

/// A single bulk `UPDATE`: for every row matching `predicate`, set each
/// assignment. Forward-only; the runner never derives an inverse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Backfill {
    pub table: String,
    pub predicate: Predicate,
    pub assignments: Vec<(String, Value)>,
}

impl Backfill {
    pub fn new(table: impl Into<String>, predicate: Predicate) -> Self {
        Self {
            table: table.into(),
            predicate,
            assignments: Vec::new(),
        }
    }

    pub fn set(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.assignments.push((column.into(), value.into()));
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.assignments.is_empty() {
            return Err(Error::InvalidStep(format!(
                "backfill on {} has no assignments",
                self.table
            )));
        }
        Ok(())
    }

    /// Run the backfill as one statement; returns the number of rows updated.
    pub fn apply(&self, executor: &dyn SchemaExecutor) -> Result<usize> {
        let updated = executor.backfill(self)?;
        info!("backfilled {updated} row(s) in {}", self.table);
        Ok(updated)
    }
}
