use shiftdb_common::Result;

use crate::backfill::Backfill;
use crate::column::ColumnDef;

/// Backend-specific primitives the runner drives. The runner never builds
/// DDL itself; everything goes through this interface.
///
/// Methods take `&self`: implementations own their connection behind a lock.
pub trait SchemaExecutor {
    fn has_column(&self, table: &str, column: &str) -> Result<bool>;

    /// Column names of `table` in declaration order.
    fn columns(&self, table: &str) -> Result<Vec<String>>;

    fn add_column(&self, table: &str, column: &ColumnDef) -> Result<()>;

    fn remove_column(&self, table: &str, column: &str) -> Result<()>;

    /// Execute `backfill` as a single statement and return the rows updated.
    fn backfill(&self, backfill: &Backfill) -> Result<usize>;

    fn execute_statement(&self, sql: &str) -> Result<()>;

    fn supports_transactions(&self) -> bool {
        false
    }

    fn begin(&self) -> Result<()> {
        Ok(())
    }

    fn commit(&self) -> Result<()> {
        Ok(())
    }

    fn rollback(&self) -> Result<()> {
        Ok(())
    }
}
