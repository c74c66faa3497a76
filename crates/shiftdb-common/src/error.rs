use thiserror::Error;

use crate::types::Version;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("column {table}.{column} already exists")]
    ColumnAlreadyExists { table: String, column: String },

    #[error("column {table}.{column} not found")]
    ColumnNotFound { table: String, column: String },

    #[error("migration {version} is older than the latest applied migration {latest}")]
    OutOfOrderMigration { version: Version, latest: Version },

    #[error("inconsistent ledger state: {0}")]
    InconsistentLedgerState(String),

    #[error("checksum mismatch for applied migration {version}: ledger has {recorded}, step has {current}")]
    ChecksumMismatch {
        version: Version,
        recorded: String,
        current: String,
    },

    #[error("duplicate migration version {0}")]
    DuplicateVersion(Version),

    #[error("invalid migration step: {0}")]
    InvalidStep(String),

    #[error("executor error: {0}")]
    Executor(String),

    #[error("ledger write error: {0}")]
    LedgerWrite(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("migration {version} ({name}) failed: {source}")]
    StepFailed {
        version: Version,
        name: String,
        #[source]
        source: Box<Error>,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Stable name of the underlying failure, looking through `StepFailed`.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::ColumnAlreadyExists { .. } => "ColumnAlreadyExists",
            Error::ColumnNotFound { .. } => "ColumnNotFound",
            Error::OutOfOrderMigration { .. } => "OutOfOrderMigration",
            Error::InconsistentLedgerState(_) => "InconsistentLedgerState",
            Error::ChecksumMismatch { .. } => "ChecksumMismatch",
            Error::DuplicateVersion(_) => "DuplicateVersion",
            Error::InvalidStep(_) => "InvalidStep",
            Error::Executor(_) => "ExecutorFailure",
            Error::LedgerWrite(_) => "LedgerWriteFailure",
            Error::Config(_) => "Config",
            Error::StepFailed { source, .. } => source.kind(),
            Error::Io(_) => "Io",
            Error::Serialization(_) => "Serialization",
        }
    }

    /// Version of the step that failed, if the error came out of a step.
    pub fn failed_version(&self) -> Option<Version> {
        match self {
            Error::StepFailed { version, .. } => Some(*version),
            Error::OutOfOrderMigration { version, .. } => Some(*version),
            Error::ChecksumMismatch { version, .. } => Some(*version),
            _ => None,
        }
    }

    /// Wrap `self` as the failure of the given step.
    pub fn in_step(self, version: Version, name: &str) -> Self {
        Error::StepFailed {
            version,
            name: name.to_string(),
            source: Box::new(self),
        }
    }
}
