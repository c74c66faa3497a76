pub mod backfill;
pub mod column;
pub mod executor;
pub mod ledger;
pub mod operation;
pub mod runner;
pub mod sqlite;
pub mod step;

pub use backfill::{Backfill, CmpOp, Operand, Predicate};
pub use column::{ColumnDef, DataType, Value};
pub use executor::SchemaExecutor;
pub use ledger::{LedgerEntry, LedgerStore};
pub use operation::{ExecOptions, Operation};
pub use runner::{MigrationReport, MigrationRunner, RunnerOptions, StepStatus};
pub use sqlite::SqliteStore;
pub use step::{MigrationStep, StepFailure};
