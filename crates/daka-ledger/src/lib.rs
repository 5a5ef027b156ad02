//! daka-ledger: durable per-day run records.
//!
//! Answers "has task T already succeeded today?" across process restarts.
//! Records are append-only; a partial unique index guarantees at most one
//! success row per (task kind, calendar date).

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{Connection, OptionalExtension};

use daka_types::{Outcome, OutcomeStatus, TaskKind};

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, LedgerError>;

/// One persisted run attempt.
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub kind: TaskKind,
    pub run_date: NaiveDate,
    pub status: OutcomeStatus,
    pub message: String,
    pub recorded_at: DateTime<Utc>,
}

/// SQLite-backed run ledger.
pub struct RunLedger {
    conn: Mutex<Connection>,
}

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS run_records (
         id INTEGER PRIMARY KEY AUTOINCREMENT,
         kind TEXT NOT NULL,
         run_date TEXT NOT NULL,
         status TEXT NOT NULL,
         message TEXT NOT NULL,
         recorded_at TEXT NOT NULL
     );

     CREATE UNIQUE INDEX IF NOT EXISTS run_records_one_success
         ON run_records (kind, run_date) WHERE status = 'success';";

impl RunLedger {
    /// Open or create the ledger database.
    pub fn open(db_path: &Path) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        conn.execute_batch(SCHEMA)?;
        tracing::info!("Ledger opened: {}", db_path.display());
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory ledger (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// True iff a success record exists for this kind on this date.
    pub fn has_succeeded_today(&self, kind: TaskKind, today: NaiveDate) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM run_records
                 WHERE kind = ?1 AND run_date = ?2 AND status = 'success'",
                rusqlite::params![kind.as_str(), today.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Append a run record. A second success for an already-successful
    /// (kind, date) key is a benign no-op; failures always append.
    pub fn record(&self, kind: TaskKind, today: NaiveDate, outcome: &Outcome) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO run_records (kind, run_date, status, message, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                kind.as_str(),
                today.to_string(),
                outcome.status.as_str(),
                outcome.message,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// All records for one date, oldest first.
    pub fn records_for(&self, date: NaiveDate) -> Result<Vec<RunRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT kind, run_date, status, message, recorded_at
             FROM run_records WHERE run_date = ?1 ORDER BY id",
        )?;
        let records = stmt
            .query_map(rusqlite::params![date.to_string()], row_to_record)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Delete records older than the given date. Retention only; the daily
    /// suppression logic never looks further back than today.
    pub fn prune_before(&self, date: NaiveDate) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let count = conn.execute(
            "DELETE FROM run_records WHERE run_date < ?1",
            rusqlite::params![date.to_string()],
        )?;
        if count > 0 {
            tracing::info!("Pruned {count} ledger records older than {date}");
        }
        Ok(count)
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<RunRecord> {
    let kind: String = row.get(0)?;
    let run_date: String = row.get(1)?;
    let status: String = row.get(2)?;
    Ok(RunRecord {
        kind: kind.parse().map_err(|_| {
            rusqlite::Error::InvalidColumnType(0, "kind".into(), rusqlite::types::Type::Text)
        })?,
        run_date: run_date.parse().map_err(|_| {
            rusqlite::Error::InvalidColumnType(1, "run_date".into(), rusqlite::types::Type::Text)
        })?,
        status: if status == "success" {
            OutcomeStatus::Success
        } else {
            OutcomeStatus::Failure
        },
        message: row.get(3)?,
        recorded_at: row
            .get::<_, String>(4)?
            .parse()
            .unwrap_or_else(|_| Utc::now()),
    })
}
