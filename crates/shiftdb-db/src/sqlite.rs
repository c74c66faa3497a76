use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use shiftdb_common::{Error, Result, StepState, Version};
use tracing::{debug, info};

use crate::backfill::{Backfill, Operand, Predicate};
use crate::column::{ColumnDef, DataType, Value};
use crate::executor::SchemaExecutor;
use crate::ledger::{LedgerEntry, LedgerStore};

/// SQLite backend: schema executor and ledger store over one connection.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    ledger_table: String,
}

impl SqliteStore {
    pub fn open(db_path: &Path, ledger_table: &str) -> Result<Self> {
        info!("opening migration store at {}", db_path.display());
        let conn = Connection::open(db_path)
            .map_err(|e| Error::Executor(format!("failed to open database: {e}")))?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=FULL; PRAGMA foreign_keys=ON;")
            .map_err(|e| Error::Executor(format!("failed to set pragmas: {e}")))?;

        Self::with_conn(conn, ledger_table)
    }

    pub fn in_memory(ledger_table: &str) -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Executor(format!("failed to open in-memory database: {e}")))?;

        conn.execute_batch("PRAGMA foreign_keys=ON;")
            .map_err(|e| Error::Executor(format!("failed to set pragmas: {e}")))?;

        Self::with_conn(conn, ledger_table)
    }

    fn with_conn(conn: Connection, ledger_table: &str) -> Result<Self> {
        if ledger_table.trim().is_empty() {
            return Err(Error::Config("ledger table name cannot be empty".into()));
        }
        let store = Self {
            conn: Mutex::new(conn),
            ledger_table: ledger_table.to_string(),
        };
        store.ensure_ledger_table()?;
        Ok(store)
    }

    pub fn ledger_table(&self) -> &str {
        &self.ledger_table
    }

    /// Run `f` against the underlying connection.
    pub fn with_connection<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T>,
    {
        let conn = self.connection()?;
        f(&conn).map_err(|e| Error::Executor(e.to_string()))
    }

    fn connection(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Executor("migration store lock poisoned".into()))
    }

    fn ensure_ledger_table(&self) -> Result<()> {
        let conn = self.connection()?;
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                version INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                state TEXT NOT NULL,
                checksum TEXT,
                sequence INTEGER,
                applied_at TEXT
            );",
            quote_ident(&self.ledger_table)
        ))
        .map_err(|e| Error::LedgerWrite(format!("failed to create ledger table: {e}")))?;

        Ok(())
    }

    fn upsert_applied(&self, version: Version, name: &str, checksum: Option<&str>) -> Result<()> {
        let conn = self.connection()?;
        let table = quote_ident(&self.ledger_table);
        conn.execute(
            &format!(
                "INSERT INTO {table} (version, name, state, checksum, sequence, applied_at)
                 VALUES (?1, ?2, 'applied', ?3,
                         (SELECT COALESCE(MAX(sequence), 0) + 1 FROM {table}), ?4)
                 ON CONFLICT(version) DO UPDATE SET
                    name = excluded.name,
                    state = 'applied',
                    checksum = COALESCE(excluded.checksum, {table}.checksum),
                    sequence = COALESCE({table}.sequence, excluded.sequence),
                    applied_at = COALESCE({table}.applied_at, excluded.applied_at)"
            ),
            params![
                version_param(version)?,
                name,
                checksum,
                Utc::now().to_rfc3339()
            ],
        )
        .map_err(|e| Error::LedgerWrite(format!("failed to mark {version} applied: {e}")))?;
        Ok(())
    }
}

impl SchemaExecutor for SqliteStore {
    fn has_column(&self, table: &str, column: &str) -> Result<bool> {
        let conn = self.connection()?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM pragma_table_info(?1) WHERE name = ?2",
                params![table, column],
                |row| row.get(0),
            )
            .map_err(|e| Error::Executor(format!("failed to inspect {table}: {e}")))?;
        Ok(count > 0)
    }

    fn columns(&self, table: &str) -> Result<Vec<String>> {
        let conn = self.connection()?;
        let mut stmt = conn
            .prepare("SELECT name FROM pragma_table_info(?1) ORDER BY cid")
            .map_err(|e| Error::Executor(format!("failed to prepare query: {e}")))?;

        let rows = stmt
            .query_map(params![table], |row| row.get::<_, String>(0))
            .map_err(|e| Error::Executor(format!("failed to list columns of {table}: {e}")))?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::Executor(format!("failed to read column row: {e}")))
    }

    fn add_column(&self, table: &str, column: &ColumnDef) -> Result<()> {
        let sql = format!(
            "ALTER TABLE {} ADD COLUMN {}",
            quote_ident(table),
            column_sql(column)
        );
        debug!("{sql}");
        let conn = self.connection()?;
        conn.execute_batch(&sql)
            .map_err(|e| Error::Executor(format!("failed to add {table}.{}: {e}", column.name)))
    }

    fn remove_column(&self, table: &str, column: &str) -> Result<()> {
        let sql = format!(
            "ALTER TABLE {} DROP COLUMN {}",
            quote_ident(table),
            quote_ident(column)
        );
        debug!("{sql}");
        let conn = self.connection()?;
        conn.execute_batch(&sql)
            .map_err(|e| Error::Executor(format!("failed to drop {table}.{column}: {e}")))
    }

    fn backfill(&self, backfill: &Backfill) -> Result<usize> {
        let mut values = Vec::new();
        let set_clause = backfill
            .assignments
            .iter()
            .map(|(column, value)| {
                values.push(sql_value(value));
                format!("{} = ?{}", quote_ident(column), values.len())
            })
            .collect::<Vec<_>>()
            .join(", ");
        let where_clause = render_predicate(&backfill.predicate, &mut values);

        let sql = format!(
            "UPDATE {} SET {set_clause} WHERE {where_clause}",
            quote_ident(&backfill.table)
        );
        debug!("{sql}");

        let conn = self.connection()?;
        conn.execute(&sql, params_from_iter(values.iter()))
            .map_err(|e| Error::Executor(format!("backfill of {} failed: {e}", backfill.table)))
    }

    fn execute_statement(&self, sql: &str) -> Result<()> {
        let conn = self.connection()?;
        conn.execute_batch(sql)
            .map_err(|e| Error::Executor(format!("statement failed: {e}")))
    }

    fn supports_transactions(&self) -> bool {
        true
    }

    fn begin(&self) -> Result<()> {
        let conn = self.connection()?;
        conn.execute_batch("BEGIN IMMEDIATE")
            .map_err(|e| Error::Executor(format!("failed to begin transaction: {e}")))
    }

    fn commit(&self) -> Result<()> {
        let conn = self.connection()?;
        conn.execute_batch("COMMIT")
            .map_err(|e| Error::Executor(format!("failed to commit transaction: {e}")))
    }

    fn rollback(&self) -> Result<()> {
        let conn = self.connection()?;
        if conn.is_autocommit() {
            return Ok(());
        }
        conn.execute_batch("ROLLBACK")
            .map_err(|e| Error::Executor(format!("failed to roll back transaction: {e}")))
    }
}

impl LedgerStore for SqliteStore {
    fn entries(&self) -> Result<Vec<LedgerEntry>> {
        let conn = self.connection()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT version, name, state, checksum, sequence, applied_at
                 FROM {}
                 ORDER BY version ASC",
                quote_ident(&self.ledger_table)
            ))
            .map_err(|e| Error::Executor(format!("failed to prepare ledger query: {e}")))?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, Option<i64>>(4)?,
                    row.get::<_, Option<String>>(5)?,
                ))
            })
            .map_err(|e| Error::Executor(format!("failed to query ledger: {e}")))?;

        let mut entries = Vec::new();
        for row in rows {
            let (version, name, state, checksum, sequence, applied_at) =
                row.map_err(|e| Error::Executor(format!("failed to read ledger row: {e}")))?;
            let version = u64::try_from(version).map_err(|_| {
                Error::InconsistentLedgerState(format!("negative version {version} in ledger"))
            })?;
            entries.push(LedgerEntry {
                version: Version::new(version),
                name,
                state: state.parse()?,
                checksum,
                sequence,
                applied_at: applied_at.as_deref().and_then(parse_datetime),
            });
        }
        Ok(entries)
    }

    fn mark_transient(&self, version: Version, name: &str, state: StepState) -> Result<()> {
        let conn = self.connection()?;
        let table = quote_ident(&self.ledger_table);
        let changed = match state {
            StepState::Applying => conn.execute(
                &format!("INSERT INTO {table} (version, name, state) VALUES (?1, ?2, 'applying')"),
                params![version_param(version)?, name],
            ),
            StepState::Reverting => conn.execute(
                &format!(
                    "UPDATE {table} SET state = 'reverting' WHERE version = ?1 AND state = 'applied'"
                ),
                params![version_param(version)?],
            ),
            other => {
                return Err(Error::LedgerWrite(format!(
                    "{other} is not a transient state"
                )));
            }
        }
        .map_err(|e| Error::LedgerWrite(format!("failed to mark {version} {state}: {e}")))?;

        if changed == 0 {
            return Err(Error::LedgerWrite(format!(
                "cannot mark {version} {state}: it is not applied"
            )));
        }
        Ok(())
    }

    fn mark_applied(&self, version: Version, name: &str, checksum: &str) -> Result<()> {
        self.upsert_applied(version, name, Some(checksum))
    }

    fn mark_reverted(&self, version: Version) -> Result<()> {
        let conn = self.connection()?;
        conn.execute(
            &format!(
                "DELETE FROM {} WHERE version = ?1",
                quote_ident(&self.ledger_table)
            ),
            params![version_param(version)?],
        )
        .map_err(|e| Error::LedgerWrite(format!("failed to mark {version} reverted: {e}")))?;
        Ok(())
    }

    fn force_state(
        &self,
        version: Version,
        name: &str,
        state: StepState,
        checksum: Option<&str>,
    ) -> Result<()> {
        match state {
            StepState::Applied => self.upsert_applied(version, name, checksum),
            StepState::Pending => self.mark_reverted(version),
            other => Err(Error::LedgerWrite(format!(
                "cannot force {version} into transient state {other}"
            ))),
        }
    }
}

impl SqliteStore {
    /// Current state of `version` in the ledger, `Pending` if absent.
    pub fn state_of(&self, version: Version) -> Result<StepState> {
        let conn = self.connection()?;
        let state: Option<String> = conn
            .query_row(
                &format!(
                    "SELECT state FROM {} WHERE version = ?1",
                    quote_ident(&self.ledger_table)
                ),
                params![version_param(version)?],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| Error::Executor(format!("failed to read ledger: {e}")))?;

        state.map_or(Ok(StepState::Pending), |s| s.parse())
    }
}

fn version_param(version: Version) -> Result<i64> {
    i64::try_from(version.get())
        .map_err(|_| Error::InvalidStep(format!("version {version} does not fit in the ledger")))
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn type_sql(data_type: DataType) -> String {
    match data_type {
        DataType::Boolean => "BOOLEAN".to_string(),
        DataType::String(len) => format!("VARCHAR({len})"),
        DataType::Text => "TEXT".to_string(),
        DataType::Date => "DATETIME".to_string(),
    }
}

fn literal_sql(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(true) => "TRUE".to_string(),
        Value::Bool(false) => "FALSE".to_string(),
        Value::Integer(n) => n.to_string(),
        Value::Text(s) => format!("'{}'", s.replace('\'', "''")),
    }
}

fn column_sql(column: &ColumnDef) -> String {
    let mut sql = format!("{} {}", quote_ident(&column.name), type_sql(column.data_type));
    if !column.nullable {
        sql.push_str(" NOT NULL");
    }
    if let Some(default) = &column.default {
        sql.push_str(" DEFAULT ");
        sql.push_str(&literal_sql(default));
    }
    sql
}

fn sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Integer(n) => SqlValue::Integer(*n),
        Value::Text(s) => SqlValue::Text(s.clone()),
    }
}

fn render_predicate(predicate: &Predicate, values: &mut Vec<SqlValue>) -> String {
    match predicate {
        Predicate::All => "1".to_string(),
        Predicate::IsNull(column) => format!("{} IS NULL", quote_ident(column)),
        Predicate::IsNotNull(column) => format!("{} IS NOT NULL", quote_ident(column)),
        // julianday() accepts both "YYYY-MM-DD HH:MM:SS" and RFC 3339 text and
        // keeps the milliseconds of 'now', so rows written earlier in the same
        // second still compare as older.
        Predicate::Compare {
            column,
            op,
            operand: Operand::Now,
        } => format!(
            "julianday({}) {} julianday('now')",
            quote_ident(column),
            op.as_sql()
        ),
        Predicate::Compare {
            column,
            op,
            operand: Operand::Value(value),
        } => {
            values.push(sql_value(value));
            format!("{} {} ?{}", quote_ident(column), op.as_sql(), values.len())
        }
        Predicate::And(parts) => join_predicates(parts, " AND ", "1", values),
        Predicate::Or(parts) => join_predicates(parts, " OR ", "0", values),
    }
}

fn join_predicates(
    parts: &[Predicate],
    separator: &str,
    empty: &str,
    values: &mut Vec<SqlValue>,
) -> String {
    if parts.is_empty() {
        return empty.to_string();
    }
    let rendered: Vec<String> = parts
        .iter()
        .map(|p| format!("({})", render_predicate(p, values)))
        .collect();
    rendered.join(separator)
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            // SQLite datetime('now') produces "YYYY-MM-DD HH:MM:SS"
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
                .map(|naive| naive.and_utc())
                .ok()
        })
}
