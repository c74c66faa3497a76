pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{DEFAULT_LEDGER_TABLE, StepState, Version};
