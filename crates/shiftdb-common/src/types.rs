use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Table holding the applied-versions ledger unless configured otherwise.
pub const DEFAULT_LEDGER_TABLE: &str = "_migrations";

/// Monotonic migration identifier, usually a `YYYYMMDDhhmmss` timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(u64);

impl Version {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Version {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u64>()
            .map(Version)
            .map_err(|e| Error::InvalidStep(format!("invalid version '{s}': {e}")))
    }
}

/// Lifecycle of a step as seen by the runner.
///
/// `Applying` and `Reverting` only exist in the ledger while a step runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepState {
    Pending,
    Applying,
    Applied,
    Reverting,
}

impl StepState {
    pub fn as_str(self) -> &'static str {
        match self {
            StepState::Pending => "pending",
            StepState::Applying => "applying",
            StepState::Applied => "applied",
            StepState::Reverting => "reverting",
        }
    }

    pub fn is_transient(self) -> bool {
        matches!(self, StepState::Applying | StepState::Reverting)
    }
}

impl fmt::Display for StepState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StepState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(StepState::Pending),
            "applying" => Ok(StepState::Applying),
            "applied" => Ok(StepState::Applied),
            "reverting" => Ok(StepState::Reverting),
            other => Err(Error::InconsistentLedgerState(format!(
                "unknown step state '{other}'"
            ))),
        }
    }
}
