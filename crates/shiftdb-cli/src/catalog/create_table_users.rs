use shiftdb_db::{MigrationStep, Operation};

pub(super) fn step() -> MigrationStep {
    MigrationStep::new(20240101000000, "create_table_users")
        .with_up(Operation::execute(
            "CREATE TABLE users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                email TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            )",
        ))
        .with_down(Operation::execute("DROP TABLE users"))
}
