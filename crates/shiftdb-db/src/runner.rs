use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::Serialize;
use shiftdb_common::{Error, Result, StepState, Version};
use tracing::{error, info, warn};

use crate::executor::SchemaExecutor;
use crate::ledger::{LedgerEntry, LedgerStore};
use crate::operation::ExecOptions;
use crate::step::{MigrationStep, StepFailure};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunnerOptions {
    pub idempotent_drop: bool,
    /// Wrap each step in a transaction when the executor supports it.
    pub transactional_steps: bool,
    /// Allow applying versions older than the latest applied one.
    pub repair: bool,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            idempotent_drop: false,
            transactional_steps: true,
            repair: false,
        }
    }
}

/// What a single `apply_pending` or `rollback` call did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    pub applied: Vec<Version>,
    pub reverted: Vec<Version>,
    /// Operations executed across all steps.
    pub operations: usize,
}

impl MigrationReport {
    pub fn is_noop(&self) -> bool {
        self.applied.is_empty() && self.reverted.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepStatus {
    pub version: Version,
    pub name: String,
    pub state: StepState,
    pub applied_at: Option<DateTime<Utc>>,
    /// False when the ledger lists a version no known step defines.
    pub known: bool,
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    Up,
    Down,
}

/// Applies and reverts ordered steps, keeping the ledger in step with what
/// actually ran. Assumes a single writer per database.
pub struct MigrationRunner<'a> {
    executor: &'a dyn SchemaExecutor,
    ledger: &'a dyn LedgerStore,
    options: RunnerOptions,
}

impl<'a> MigrationRunner<'a> {
    pub fn new(
        executor: &'a dyn SchemaExecutor,
        ledger: &'a dyn LedgerStore,
        options: RunnerOptions,
    ) -> Self {
        if options.transactional_steps && !executor.supports_transactions() {
            warn!("executor has no transaction support; steps will run unscoped");
        }
        Self {
            executor,
            ledger,
            options,
        }
    }

    /// Apply every step not yet in the ledger, in ascending version order.
    pub fn apply_pending(&self, steps: &[MigrationStep]) -> Result<MigrationReport> {
        let steps = ordered(steps)?;
        let entries = self.load_ledger()?;
        verify_checksums(&steps, &entries)?;

        let applied: BTreeSet<Version> = entries.iter().map(|e| e.version).collect();
        let pending: Vec<&MigrationStep> = steps
            .into_iter()
            .filter(|s| !applied.contains(&s.version()))
            .collect();

        let mut report = MigrationReport::default();
        if pending.is_empty() {
            info!("no pending migrations");
            return Ok(report);
        }

        if let Some(&latest) = applied.last() {
            if let Some(stale) = pending.iter().find(|s| s.version() < latest) {
                if !self.options.repair {
                    return Err(Error::OutOfOrderMigration {
                        version: stale.version(),
                        latest,
                    });
                }
                warn!(
                    "repair mode: applying {} below latest applied version {latest}",
                    stale.version()
                );
            }
        }

        info!("applying {} pending migration(s)", pending.len());
        for step in pending {
            report.operations += self.apply_step(step)?;
            report.applied.push(step.version());
        }
        Ok(report)
    }

    /// Revert the `count` most recently applied versions, newest first.
    ///
    /// Recency is the order steps were applied in, which matches descending
    /// version order except after a repair-mode apply of an older version.
    pub fn rollback(&self, steps: &[MigrationStep], count: usize) -> Result<MigrationReport> {
        let steps = ordered(steps)?;
        let mut entries = self.load_ledger()?;
        verify_checksums(&steps, &entries)?;

        let by_version: BTreeMap<Version, &MigrationStep> =
            steps.iter().map(|s| (s.version(), *s)).collect();

        entries.sort_by_key(|e| std::cmp::Reverse((e.sequence, e.version)));
        let targets = entries
            .iter()
            .take(count)
            .map(|entry| {
                by_version.get(&entry.version).copied().ok_or_else(|| {
                    Error::InconsistentLedgerState(format!(
                        "applied migration {} ({}) has no matching step",
                        entry.version, entry.name
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut report = MigrationReport::default();
        if targets.is_empty() {
            info!("no applied migrations to roll back");
            return Ok(report);
        }
        if targets.len() < count {
            info!(
                "requested {count} rollback(s), only {} applied",
                targets.len()
            );
        }

        for step in targets {
            report.operations += self.revert_step(step)?;
            report.reverted.push(step.version());
        }
        Ok(report)
    }

    /// State of every known step, plus any ledgered version without a step.
    /// Transient states are reported rather than treated as errors.
    pub fn status(&self, steps: &[MigrationStep]) -> Result<Vec<StepStatus>> {
        let steps = ordered(steps)?;
        let mut entries: BTreeMap<Version, LedgerEntry> = self
            .ledger
            .entries()?
            .into_iter()
            .map(|e| (e.version, e))
            .collect();

        let mut statuses: Vec<StepStatus> = steps
            .iter()
            .map(|step| {
                let entry = entries.remove(&step.version());
                StepStatus {
                    version: step.version(),
                    name: step.name().to_string(),
                    state: entry.as_ref().map_or(StepState::Pending, |e| e.state),
                    applied_at: entry.and_then(|e| e.applied_at),
                    known: true,
                }
            })
            .collect();

        statuses.extend(entries.into_values().map(|e| StepStatus {
            version: e.version,
            name: e.name,
            state: e.state,
            applied_at: e.applied_at,
            known: false,
        }));
        statuses.sort_by_key(|s| s.version);
        Ok(statuses)
    }

    /// Settle `version` as `Applied` or `Pending` after an operator has
    /// repaired the schema by hand.
    pub fn mark(&self, steps: &[MigrationStep], version: Version, state: StepState) -> Result<()> {
        if state.is_transient() {
            return Err(Error::InvalidStep(format!(
                "cannot mark {version} as {state}"
            )));
        }
        let steps = ordered(steps)?;
        let step = steps.iter().find(|s| s.version() == version);

        match (step, state) {
            (Some(step), StepState::Applied) => {
                let checksum = step.checksum()?;
                self.ledger
                    .force_state(version, step.name(), state, Some(&checksum))?;
            }
            (None, StepState::Applied) => {
                return Err(Error::InvalidStep(format!(
                    "no step with version {version}"
                )));
            }
            (step, _) => {
                let name = step.map_or("", |s| s.name());
                self.ledger.force_state(version, name, state, None)?;
            }
        }
        warn!("ledger entry {version} manually set to {state}");
        Ok(())
    }

    fn load_ledger(&self) -> Result<Vec<LedgerEntry>> {
        let entries = self.ledger.entries()?;
        if let Some(stuck) = entries.iter().find(|e| e.state.is_transient()) {
            error!(
                "migration {} ({}) was left {}",
                stuck.version, stuck.name, stuck.state
            );
            return Err(Error::InconsistentLedgerState(format!(
                "migration {} ({}) is stuck in state {}; manual intervention required",
                stuck.version, stuck.name, stuck.state
            )));
        }
        Ok(entries)
    }

    fn apply_step(&self, step: &MigrationStep) -> Result<usize> {
        let (version, name) = (step.version(), step.name());
        let checksum = step.checksum()?;
        info!("applying migration {version} ({name})");

        self.ledger
            .mark_transient(version, name, StepState::Applying)
            .map_err(|e| e.in_step(version, name))?;

        match self.run_scoped(step, Direction::Up) {
            Ok(ops) => {
                self.ledger
                    .mark_applied(version, name, &checksum)
                    .map_err(|e| e.in_step(version, name))?;
                info!("applied migration {version} ({name}), {ops} operation(s)");
                Ok(ops)
            }
            Err(failure) => {
                self.settle_failure(step, StepState::Pending, None, failure.completed);
                Err(failure.error.in_step(version, name))
            }
        }
    }

    fn revert_step(&self, step: &MigrationStep) -> Result<usize> {
        let (version, name) = (step.version(), step.name());
        info!("reverting migration {version} ({name})");

        self.ledger
            .mark_transient(version, name, StepState::Reverting)
            .map_err(|e| e.in_step(version, name))?;

        match self.run_scoped(step, Direction::Down) {
            Ok(ops) => {
                self.ledger
                    .mark_reverted(version)
                    .map_err(|e| e.in_step(version, name))?;
                info!("reverted migration {version} ({name}), {ops} operation(s)");
                Ok(ops)
            }
            Err(failure) => {
                let checksum = step.checksum().ok();
                self.settle_failure(
                    step,
                    StepState::Applied,
                    checksum.as_deref(),
                    failure.completed,
                );
                Err(failure.error.in_step(version, name))
            }
        }
    }

    fn run_scoped(
        &self,
        step: &MigrationStep,
        direction: Direction,
    ) -> std::result::Result<usize, StepFailure> {
        let exec = ExecOptions {
            idempotent_drop: self.options.idempotent_drop,
        };
        let run = |exec: &ExecOptions| match direction {
            Direction::Up => step.up(self.executor, exec),
            Direction::Down => step.down(self.executor, exec),
        };

        if !(self.options.transactional_steps && self.executor.supports_transactions()) {
            return run(&exec);
        }

        self.executor
            .begin()
            .map_err(|error| StepFailure { completed: 0, error })?;

        match run(&exec) {
            Ok(ops) => match self.executor.commit() {
                Ok(()) => Ok(ops),
                Err(error) => {
                    if let Err(e) = self.executor.rollback() {
                        error!("rollback after failed commit also failed: {e}");
                    }
                    Err(StepFailure { completed: 0, error })
                }
            },
            Err(failure) => match self.executor.rollback() {
                // Rolled back: nothing from this step survived.
                Ok(()) => Err(StepFailure {
                    completed: 0,
                    error: failure.error,
                }),
                Err(e) => {
                    error!("failed to roll back migration {}: {e}", step.version());
                    Err(failure)
                }
            },
        }
    }

    /// Clear the transient ledger marker after a failed step, unless the step
    /// left partial changes behind, in which case the marker stays so the next
    /// run refuses to proceed.
    fn settle_failure(
        &self,
        step: &MigrationStep,
        restore: StepState,
        checksum: Option<&str>,
        completed: usize,
    ) {
        let version = step.version();
        if completed > 0 {
            error!(
                "migration {version} ({}) failed after {completed} operation(s); \
                 ledger left in transient state for manual intervention",
                step.name()
            );
            return;
        }
        if let Err(e) = self
            .ledger
            .force_state(version, step.name(), restore, checksum)
        {
            error!("failed to restore ledger entry {version} to {restore}: {e}");
        }
    }
}

/// Validate `steps` and return them sorted by version.
fn ordered(steps: &[MigrationStep]) -> Result<Vec<&MigrationStep>> {
    let mut sorted: Vec<&MigrationStep> = steps.iter().collect();
    sorted.sort_by_key(|s| s.version());
    for pair in sorted.windows(2) {
        if pair[0].version() == pair[1].version() {
            return Err(Error::DuplicateVersion(pair[0].version()));
        }
    }
    for step in &sorted {
        step.validate()?;
    }
    Ok(sorted)
}

fn verify_checksums(steps: &[&MigrationStep], entries: &[LedgerEntry]) -> Result<()> {
    let by_version: BTreeMap<Version, &MigrationStep> =
        steps.iter().map(|s| (s.version(), *s)).collect();

    for entry in entries {
        let Some(step) = by_version.get(&entry.version) else {
            warn!(
                "ledger has applied migration {} ({}) with no matching step",
                entry.version, entry.name
            );
            continue;
        };
        let Some(recorded) = &entry.checksum else {
            continue;
        };
        let current = step.checksum()?;
        if &current != recorded {
            return Err(Error::ChecksumMismatch {
                version: entry.version,
                recorded: recorded.clone(),
                current,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};

    use super::*;
    use crate::backfill::{Backfill, Predicate};
    use crate::column::{ColumnDef, DataType};
    use crate::operation::Operation;
    use crate::sqlite::SqliteStore;
    use shiftdb_common::DEFAULT_LEDGER_TABLE;

    /// Counts executor calls and can fail a chosen column add.
    struct CountingExecutor<'a> {
        inner: &'a SqliteStore,
        calls: Cell<usize>,
        fail_on_add: RefCell<Option<String>>,
        fail_on_remove: RefCell<Option<String>>,
    }

    impl<'a> CountingExecutor<'a> {
        fn new(inner: &'a SqliteStore) -> Self {
            Self {
                inner,
                calls: Cell::new(0),
                fail_on_add: RefCell::new(None),
                fail_on_remove: RefCell::new(None),
            }
        }

        fn tick(&self) {
            self.calls.set(self.calls.get() + 1);
        }
    }

    impl SchemaExecutor for CountingExecutor<'_> {
        fn has_column(&self, table: &str, column: &str) -> Result<bool> {
            self.tick();
            self.inner.has_column(table, column)
        }
        fn columns(&self, table: &str) -> Result<Vec<String>> {
            self.inner.columns(table)
        }
        fn add_column(&self, table: &str, column: &ColumnDef) -> Result<()> {
            self.tick();
            if self.fail_on_add.borrow().as_deref() == Some(column.name.as_str()) {
                return Err(Error::Executor("disk full".into()));
            }
            self.inner.add_column(table, column)
        }
        fn remove_column(&self, table: &str, column: &str) -> Result<()> {
            self.tick();
            if self.fail_on_remove.borrow().as_deref() == Some(column) {
                return Err(Error::Executor("database is locked".into()));
            }
            self.inner.remove_column(table, column)
        }
        fn backfill(&self, backfill: &Backfill) -> Result<usize> {
            self.tick();
            self.inner.backfill(backfill)
        }
        fn execute_statement(&self, sql: &str) -> Result<()> {
            self.tick();
            self.inner.execute_statement(sql)
        }
        fn supports_transactions(&self) -> bool {
            self.inner.supports_transactions()
        }
        fn begin(&self) -> Result<()> {
            self.inner.begin()
        }
        fn commit(&self) -> Result<()> {
            self.inner.commit()
        }
        fn rollback(&self) -> Result<()> {
            self.inner.rollback()
        }
    }

    fn create_things(version: u64) -> MigrationStep {
        MigrationStep::new(version, "create_things")
            .with_up(Operation::execute(
                "CREATE TABLE things (id INTEGER PRIMARY KEY)",
            ))
            .with_down(Operation::execute("DROP TABLE things"))
    }

    fn add_column_step(version: u64, column: &str) -> MigrationStep {
        MigrationStep::new(version, format!("add_{column}"))
            .with_up(Operation::add_column(
                "things",
                ColumnDef::new(column, DataType::Text),
            ))
            .with_down(Operation::remove_column("things", column))
    }

    fn steps() -> Vec<MigrationStep> {
        vec![
            add_column_step(3, "label"),
            create_things(1),
            add_column_step(2, "note"),
        ]
    }

    fn store() -> SqliteStore {
        SqliteStore::in_memory(DEFAULT_LEDGER_TABLE).unwrap()
    }

    #[test]
    fn applies_in_ascending_order_and_rolls_back_fully() {
        let store = store();
        let runner = MigrationRunner::new(&store, &store, RunnerOptions::default());
        let steps = steps();

        let report = runner.apply_pending(&steps).unwrap();
        assert_eq!(
            report.applied,
            vec![Version::new(1), Version::new(2), Version::new(3)]
        );
        assert_eq!(report.operations, 3);
        assert_eq!(store.columns("things").unwrap(), vec!["id", "note", "label"]);

        let report = runner.rollback(&steps, steps.len()).unwrap();
        assert_eq!(
            report.reverted,
            vec![Version::new(3), Version::new(2), Version::new(1)]
        );
        assert!(store.list_applied().unwrap().is_empty());
        assert!(store.columns("things").unwrap().is_empty());
    }

    #[test]
    fn second_apply_is_a_noop_with_zero_operations() {
        let store = store();
        let counting = CountingExecutor::new(&store);
        let runner = MigrationRunner::new(&counting, &store, RunnerOptions::default());
        let steps = steps();

        runner.apply_pending(&steps).unwrap();
        let ledger_after_first = store.entries().unwrap();
        let calls_after_first = counting.calls.get();

        let report = runner.apply_pending(&steps).unwrap();
        assert!(report.is_noop());
        assert_eq!(report.operations, 0);
        assert_eq!(counting.calls.get(), calls_after_first);
        assert_eq!(store.entries().unwrap(), ledger_after_first);
    }

    #[test]
    fn ledger_order_matches_version_order() {
        let store = store();
        let runner = MigrationRunner::new(&store, &store, RunnerOptions::default());
        runner.apply_pending(&steps()).unwrap();

        let entries = store.entries().unwrap();
        for pair in entries.windows(2) {
            assert!(pair[0].version < pair[1].version);
            assert!(pair[0].sequence < pair[1].sequence);
        }
    }

    #[test]
    fn rollback_defaults_to_most_recent_and_clamps_count() {
        let store = store();
        let runner = MigrationRunner::new(&store, &store, RunnerOptions::default());
        let steps = steps();
        runner.apply_pending(&steps).unwrap();

        let report = runner.rollback(&steps, 1).unwrap();
        assert_eq!(report.reverted, vec![Version::new(3)]);
        assert_eq!(
            store.list_applied().unwrap(),
            vec![Version::new(1), Version::new(2)]
        );

        let report = runner.rollback(&steps, 10).unwrap();
        assert_eq!(report.reverted, vec![Version::new(2), Version::new(1)]);

        assert!(runner.rollback(&steps, 1).unwrap().is_noop());
    }

    #[test]
    fn rejects_out_of_order_step_unless_repairing() {
        let store = store();
        let runner = MigrationRunner::new(&store, &store, RunnerOptions::default());
        let mut steps = vec![create_things(1), add_column_step(3, "label")];
        runner.apply_pending(&steps).unwrap();

        steps.push(add_column_step(2, "note"));
        let err = runner.apply_pending(&steps).unwrap_err();
        assert!(matches!(
            err,
            Error::OutOfOrderMigration { version, latest }
                if version == Version::new(2) && latest == Version::new(3)
        ));
        assert!(!store.has_column("things", "note").unwrap());

        let repair = MigrationRunner::new(
            &store,
            &store,
            RunnerOptions {
                repair: true,
                ..RunnerOptions::default()
            },
        );
        let report = repair.apply_pending(&steps).unwrap();
        assert_eq!(report.applied, vec![Version::new(2)]);
    }

    #[test]
    fn rollback_follows_application_order_after_repair() {
        let store = store();
        let runner = MigrationRunner::new(&store, &store, RunnerOptions::default());
        let mut steps = vec![create_things(1), add_column_step(3, "label")];
        runner.apply_pending(&steps).unwrap();

        steps.push(add_column_step(2, "note"));
        let repair = MigrationRunner::new(
            &store,
            &store,
            RunnerOptions {
                repair: true,
                ..RunnerOptions::default()
            },
        );
        repair.apply_pending(&steps).unwrap();

        // Version 2 went in last, so it comes out first.
        let report = runner.rollback(&steps, 1).unwrap();
        assert_eq!(report.reverted, vec![Version::new(2)]);
        assert!(!store.has_column("things", "note").unwrap());
        assert!(store.has_column("things", "label").unwrap());

        let report = runner.rollback(&steps, 2).unwrap();
        assert_eq!(report.reverted, vec![Version::new(3), Version::new(1)]);
    }

    #[test]
    fn duplicate_versions_are_rejected() {
        let store = store();
        let runner = MigrationRunner::new(&store, &store, RunnerOptions::default());
        let steps = vec![create_things(1), add_column_step(1, "note")];
        let err = runner.apply_pending(&steps).unwrap_err();
        assert_eq!(err.kind(), "DuplicateVersion");
    }

    #[test]
    fn transient_state_at_startup_is_fatal() {
        let store = store();
        store
            .mark_transient(Version::new(1), "create_things", StepState::Applying)
            .unwrap();
        let runner = MigrationRunner::new(&store, &store, RunnerOptions::default());

        let err = runner.apply_pending(&steps()).unwrap_err();
        assert_eq!(err.kind(), "InconsistentLedgerState");
        let err = runner.rollback(&steps(), 1).unwrap_err();
        assert_eq!(err.kind(), "InconsistentLedgerState");

        // status still reports it
        let status = runner.status(&steps()).unwrap();
        assert_eq!(status[0].state, StepState::Applying);
    }

    #[test]
    fn failed_transactional_step_leaves_schema_and_ledger_untouched() {
        let store = store();
        let counting = CountingExecutor::new(&store);
        let runner = MigrationRunner::new(&counting, &store, RunnerOptions::default());

        let two_columns = MigrationStep::new(2, "two_columns")
            .with_up(Operation::add_column(
                "things",
                ColumnDef::new("a", DataType::Text),
            ))
            .with_up(Operation::add_column(
                "things",
                ColumnDef::new("b", DataType::Text),
            ))
            .with_down(Operation::remove_column("things", "b"))
            .with_down(Operation::remove_column("things", "a"));
        let steps = vec![create_things(1), two_columns, add_column_step(3, "label")];

        *counting.fail_on_add.borrow_mut() = Some("b".into());
        let err = runner.apply_pending(&steps).unwrap_err();
        assert_eq!(err.kind(), "ExecutorFailure");
        assert_eq!(err.failed_version(), Some(Version::new(2)));

        // Step 1 stays applied; step 2 rolled back; step 3 never ran.
        assert_eq!(store.list_applied().unwrap(), vec![Version::new(1)]);
        assert_eq!(store.columns("things").unwrap(), vec!["id"]);
        assert_eq!(store.state_of(Version::new(2)).unwrap(), StepState::Pending);

        *counting.fail_on_add.borrow_mut() = None;
        let report = runner.apply_pending(&steps).unwrap();
        assert_eq!(report.applied, vec![Version::new(2), Version::new(3)]);
    }

    #[test]
    fn failed_unscoped_step_keeps_transient_marker() {
        let store = store();
        let counting = CountingExecutor::new(&store);
        let options = RunnerOptions {
            transactional_steps: false,
            ..RunnerOptions::default()
        };
        let runner = MigrationRunner::new(&counting, &store, options);

        let two_columns = MigrationStep::new(2, "two_columns")
            .with_up(Operation::add_column(
                "things",
                ColumnDef::new("a", DataType::Text),
            ))
            .with_up(Operation::add_column(
                "things",
                ColumnDef::new("b", DataType::Text),
            ));
        let steps = vec![create_things(1), two_columns];

        *counting.fail_on_add.borrow_mut() = Some("b".into());
        runner.apply_pending(&steps).unwrap_err();

        assert!(store.has_column("things", "a").unwrap());
        assert_eq!(store.state_of(Version::new(2)).unwrap(), StepState::Applying);
        let err = runner.apply_pending(&steps).unwrap_err();
        assert_eq!(err.kind(), "InconsistentLedgerState");

        // Operator finishes the step by hand and settles the ledger.
        store.add_column("things", &ColumnDef::new("b", DataType::Text)).unwrap();
        runner.mark(&steps, Version::new(2), StepState::Applied).unwrap();
        assert!(runner.apply_pending(&steps).unwrap().is_noop());
    }

    fn two_columns_step() -> MigrationStep {
        MigrationStep::new(2, "two_columns")
            .with_up(Operation::add_column(
                "things",
                ColumnDef::new("a", DataType::Text),
            ))
            .with_up(Operation::add_column(
                "things",
                ColumnDef::new("b", DataType::Text),
            ))
            .with_down(Operation::remove_column("things", "b"))
            .with_down(Operation::remove_column("things", "a"))
    }

    #[test]
    fn failed_transactional_revert_stays_applied() {
        let store = store();
        let counting = CountingExecutor::new(&store);
        let runner = MigrationRunner::new(&counting, &store, RunnerOptions::default());
        let steps = vec![create_things(1), two_columns_step()];
        runner.apply_pending(&steps).unwrap();

        *counting.fail_on_remove.borrow_mut() = Some("a".into());
        let err = runner.rollback(&steps, 1).unwrap_err();
        assert_eq!(err.kind(), "ExecutorFailure");
        assert_eq!(err.failed_version(), Some(Version::new(2)));

        // The drop of "b" was rolled back with the rest of the step.
        assert_eq!(store.columns("things").unwrap(), vec!["id", "a", "b"]);
        assert_eq!(store.state_of(Version::new(2)).unwrap(), StepState::Applied);
        let entry = store
            .entries()
            .unwrap()
            .into_iter()
            .find(|e| e.version == Version::new(2))
            .unwrap();
        assert_eq!(entry.checksum, Some(steps[1].checksum().unwrap()));
        assert!(runner.apply_pending(&steps).unwrap().is_noop());

        *counting.fail_on_remove.borrow_mut() = None;
        let report = runner.rollback(&steps, 1).unwrap();
        assert_eq!(report.reverted, vec![Version::new(2)]);
        assert_eq!(store.columns("things").unwrap(), vec!["id"]);
    }

    #[test]
    fn failed_unscoped_revert_keeps_reverting_marker() {
        let store = store();
        let counting = CountingExecutor::new(&store);
        let options = RunnerOptions {
            transactional_steps: false,
            ..RunnerOptions::default()
        };
        let runner = MigrationRunner::new(&counting, &store, options);
        let steps = vec![create_things(1), two_columns_step()];
        runner.apply_pending(&steps).unwrap();

        *counting.fail_on_remove.borrow_mut() = Some("a".into());
        runner.rollback(&steps, 1).unwrap_err();

        assert!(!store.has_column("things", "b").unwrap());
        assert!(store.has_column("things", "a").unwrap());
        assert_eq!(
            store.state_of(Version::new(2)).unwrap(),
            StepState::Reverting
        );
        let err = runner.rollback(&steps, 1).unwrap_err();
        assert_eq!(err.kind(), "InconsistentLedgerState");

        // Operator finishes the revert by hand and settles the ledger.
        store.remove_column("things", "a").unwrap();
        runner.mark(&steps, Version::new(2), StepState::Pending).unwrap();
        assert_eq!(store.list_applied().unwrap(), vec![Version::new(1)]);
    }

    #[test]
    fn failure_before_any_operation_restores_ledger_without_transaction() {
        let store = store();
        let options = RunnerOptions {
            transactional_steps: false,
            ..RunnerOptions::default()
        };
        let runner = MigrationRunner::new(&store, &store, options);
        let steps = vec![add_column_step(1, "note")];

        let err = runner.apply_pending(&steps).unwrap_err();
        assert_eq!(err.kind(), "ExecutorFailure");
        assert_eq!(store.state_of(Version::new(1)).unwrap(), StepState::Pending);
    }

    #[test]
    fn edited_applied_step_fails_checksum() {
        let store = store();
        let runner = MigrationRunner::new(&store, &store, RunnerOptions::default());
        runner.apply_pending(&[create_things(1)]).unwrap();

        let edited = create_things(1).with_up(Operation::execute("SELECT 1"));
        let err = runner.apply_pending(&[edited]).unwrap_err();
        assert_eq!(err.kind(), "ChecksumMismatch");
    }

    #[test]
    fn rollback_needs_a_step_for_every_target() {
        let store = store();
        let runner = MigrationRunner::new(&store, &store, RunnerOptions::default());
        runner.apply_pending(&steps()).unwrap();

        let fewer = vec![create_things(1), add_column_step(2, "note")];
        let err = runner.rollback(&fewer, 1).unwrap_err();
        assert_eq!(err.kind(), "InconsistentLedgerState");
        assert_eq!(store.list_applied().unwrap().len(), 3);
    }

    #[test]
    fn status_lists_known_and_unknown_versions() {
        let store = store();
        let runner = MigrationRunner::new(&store, &store, RunnerOptions::default());
        runner.apply_pending(&[create_things(1)]).unwrap();
        store.mark_applied(Version::new(99), "from_elsewhere", "x").unwrap();

        let status = runner.status(&steps()).unwrap();
        let summary: Vec<_> = status
            .iter()
            .map(|s| (s.version.get(), s.state, s.known))
            .collect();
        assert_eq!(
            summary,
            vec![
                (1, StepState::Applied, true),
                (2, StepState::Pending, true),
                (3, StepState::Pending, true),
                (99, StepState::Applied, false),
            ]
        );
    }

    #[test]
    fn mark_rejects_transient_states_and_unknown_applied_versions() {
        let store = store();
        let runner = MigrationRunner::new(&store, &store, RunnerOptions::default());
        assert!(runner.mark(&steps(), Version::new(1), StepState::Applying).is_err());
        assert!(runner.mark(&steps(), Version::new(50), StepState::Applied).is_err());
        runner.mark(&steps(), Version::new(50), StepState::Pending).unwrap();
    }

    #[test]
    fn backfill_step_counts_as_one_operation() {
        let store = store();
        let runner = MigrationRunner::new(&store, &store, RunnerOptions::default());
        let fill = MigrationStep::new(2, "fill_label")
            .with_up(Operation::add_column(
                "things",
                ColumnDef::new("label", DataType::Text),
            ))
            .with_up(Operation::backfill(
                Backfill::new("things", Predicate::All).set("label", "none"),
            ))
            .with_down(Operation::remove_column("things", "label"));

        store
            .execute_statement("CREATE TABLE things (id INTEGER PRIMARY KEY); INSERT INTO things DEFAULT VALUES;")
            .unwrap();
        let report = runner.apply_pending(&[fill]).unwrap();
        assert_eq!(report.operations, 2);
        let label: String = store
            .with_connection(|c| c.query_row("SELECT label FROM things", [], |r| r.get(0)))
            .unwrap();
        assert_eq!(label, "none");
    }
}
