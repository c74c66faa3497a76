use shiftdb_db::MigrationStep;

mod add_email_verification_to_users;
mod create_table_users;

/// Every migration this binary knows about. Append new steps; never edit or
/// reorder ones that have shipped.
pub fn steps() -> Vec<MigrationStep> {
    vec![
        create_table_users::step(),
        add_email_verification_to_users::step(),
    ]
}

#[cfg(test)]
mod tests {
    use shiftdb_common::{DEFAULT_LEDGER_TABLE, Error};
    use shiftdb_db::{MigrationRunner, RunnerOptions, SchemaExecutor, SqliteStore};

    use super::*;

    #[test]
    fn catalog_versions_are_unique_and_ascending() {
        let steps = steps();
        for pair in steps.windows(2) {
            assert!(pair[0].version() < pair[1].version());
        }
        for step in &steps {
            step.validate().unwrap();
        }
    }

    #[test]
    fn full_catalog_round_trip() {
        let store = SqliteStore::in_memory(DEFAULT_LEDGER_TABLE).unwrap();
        let runner = MigrationRunner::new(&store, &store, RunnerOptions::default());
        let steps = steps();

        runner.apply_pending(&steps).unwrap();
        assert!(store.has_column("users", "is_email_verified").unwrap());
        assert!(store.has_column("users", "temp_profile_data").unwrap());

        runner.rollback(&steps, steps.len()).unwrap();
        assert!(store.columns("users").unwrap().is_empty());
    }

    #[test]
    fn users_who_signed_up_just_before_the_migration_are_verified() {
        let store = SqliteStore::in_memory(DEFAULT_LEDGER_TABLE).unwrap();
        let runner = MigrationRunner::new(&store, &store, RunnerOptions::default());
        let steps = steps();

        runner.apply_pending(&steps[..1]).unwrap();
        store
            .execute_statement(
                "INSERT INTO users (email, password_hash) VALUES
                    ('a@example.com', 'x'), ('b@example.com', 'x'), ('c@example.com', 'x')",
            )
            .unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        runner.apply_pending(&steps).unwrap();

        let verified: i64 = store
            .with_connection(|conn| {
                conn.query_row(
                    "SELECT COUNT(*) FROM users WHERE is_email_verified",
                    [],
                    |row| row.get(0),
                )
            })
            .unwrap();
        assert_eq!(verified, 3);
    }

    #[test]
    fn reverting_email_verification_twice_fails_without_idempotent_drop() {
        let store = SqliteStore::in_memory(DEFAULT_LEDGER_TABLE).unwrap();
        let runner = MigrationRunner::new(&store, &store, RunnerOptions::default());
        let steps = steps();
        runner.apply_pending(&steps).unwrap();
        runner.rollback(&steps, 1).unwrap();

        let step = &steps[1];
        let failure = step
            .down(&store, &shiftdb_db::ExecOptions::default())
            .unwrap_err();
        assert!(matches!(failure.error, Error::ColumnNotFound { .. }));
    }
}
