use ring::digest::{SHA256, digest};
use serde::Serialize;
use shiftdb_common::{Error, Result, Version};

use crate::executor::SchemaExecutor;
use crate::operation::{ExecOptions, Operation};

/// A versioned, reversible unit of schema change.
///
/// `down` must undo the schema-visible effect of `up` when run after it.
/// Data written by backfills and data held in dropped columns is not
/// restored.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MigrationStep {
    version: Version,
    name: String,
    up: Vec<Operation>,
    down: Vec<Operation>,
}

/// The first failing operation of a step, with how many operations before it
/// had already completed.
#[derive(Debug)]
pub struct StepFailure {
    pub completed: usize,
    pub error: Error,
}

impl From<StepFailure> for Error {
    fn from(failure: StepFailure) -> Self {
        failure.error
    }
}

impl MigrationStep {
    pub fn new(version: u64, name: impl Into<String>) -> Self {
        Self {
            version: Version::new(version),
            name: name.into(),
            up: Vec::new(),
            down: Vec::new(),
        }
    }

    pub fn with_up(mut self, op: Operation) -> Self {
        self.up.push(op);
        self
    }

    pub fn with_down(mut self, op: Operation) -> Self {
        self.down.push(op);
        self
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn up_ops(&self) -> &[Operation] {
        &self.up
    }

    pub fn down_ops(&self) -> &[Operation] {
        &self.down
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::InvalidStep(format!(
                "migration {} has an empty name",
                self.version
            )));
        }
        if self.up.is_empty() {
            return Err(Error::InvalidStep(format!(
                "migration {} ({}) has no up operations",
                self.version, self.name
            )));
        }
        self.up
            .iter()
            .chain(&self.down)
            .try_for_each(Operation::validate)
            .map_err(|e| e.in_step(self.version, &self.name))
    }

    /// Hex SHA-256 over the step's canonical JSON form. Stored in the ledger
    /// to detect edits to an already-applied step.
    pub fn checksum(&self) -> Result<String> {
        let encoded = serde_json::to_vec(self)?;
        let hash = digest(&SHA256, &encoded);
        Ok(hash.as_ref().iter().map(|b| format!("{b:02x}")).collect())
    }

    pub fn up(
        &self,
        executor: &dyn SchemaExecutor,
        options: &ExecOptions,
    ) -> std::result::Result<usize, StepFailure> {
        run_ops(&self.up, executor, options)
    }

    pub fn down(
        &self,
        executor: &dyn SchemaExecutor,
        options: &ExecOptions,
    ) -> std::result::Result<usize, StepFailure> {
        run_ops(&self.down, executor, options)
    }
}

fn run_ops(
    ops: &[Operation],
    executor: &dyn SchemaExecutor,
    options: &ExecOptions,
) -> std::result::Result<usize, StepFailure> {
    for (completed, op) in ops.iter().enumerate() {
        op.run(executor, options)
            .map_err(|error| StepFailure { completed, error })?;
    }
    Ok(ops.len())
}
