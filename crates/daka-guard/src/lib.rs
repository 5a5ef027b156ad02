//! daka-guard: cross-process mutual exclusion per task kind.
//!
//! The claim is a SQLite row keyed by the task kind in a shared database
//! file, so a one-shot invocation and the continuous scheduler contend for
//! the same claim even as separate processes. Acquisition is a single
//! conditional upsert: insert the claim, or steal an existing one only when
//! its embedded acquisition time is older than the staleness bound. SQLite
//! serializes writers, so of any number of concurrent attempts for one kind
//! exactly one claim lands — including in the crash-recovery window where
//! several attempts race to reclaim the same stale row.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};

use daka_types::TaskKind;

#[derive(Debug, thiserror::Error)]
pub enum GuardError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, GuardError>;

/// Result of a lock attempt.
pub enum Acquire {
    /// Exclusive execution rights; released when the handle drops.
    Acquired(LockHandle),
    /// Another attempt for the same kind is in flight.
    Busy,
}

impl Acquire {
    pub fn is_busy(&self) -> bool {
        matches!(self, Acquire::Busy)
    }
}

/// Held lock for one task kind. Dropping the handle deletes the claim row on
/// every exit path of the guarded section. The delete is token-guarded: a
/// holder whose claim was stolen as stale cannot release its successor's claim.
pub struct LockHandle {
    conn: Arc<Mutex<Connection>>,
    kind: TaskKind,
    token: String,
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        let Ok(conn) = self.conn.lock() else { return };
        match conn.execute(
            "DELETE FROM task_locks WHERE kind = ?1 AND token = ?2",
            rusqlite::params![self.kind.as_str(), self.token],
        ) {
            Ok(_) => tracing::debug!(kind = %self.kind, "Lock released"),
            Err(e) => tracing::warn!(kind = %self.kind, "Failed to release lock: {e}"),
        }
    }
}

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS task_locks (
         kind TEXT PRIMARY KEY,
         pid INTEGER NOT NULL,
         token TEXT NOT NULL,
         acquired_at INTEGER NOT NULL
     );";

/// SQLite-backed task lock with stale-claim reclamation.
pub struct TaskLock {
    conn: Arc<Mutex<Connection>>,
    stale_after: Duration,
}

impl TaskLock {
    /// Open or create the lock store. `stale_after` must exceed the
    /// worst-case task duration with margin; it bounds how long a crashed
    /// attempt can block its successor.
    pub fn open(db_path: &Path, stale_after: Duration) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            stale_after,
        })
    }

    /// Open an in-memory lock store (for testing; single process only).
    pub fn open_in_memory(stale_after: Duration) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            stale_after,
        })
    }

    /// Try to claim exclusive execution rights for `kind`.
    ///
    /// Linearizable per kind: the insert-or-steal below is one statement, so
    /// concurrent callers — in-process or cross-process — observe exactly one
    /// winner regardless of call-order races.
    pub fn try_acquire(&self, kind: TaskKind) -> Result<Acquire> {
        let now = Utc::now().timestamp();
        let cutoff = now - i64::try_from(self.stale_after.as_secs()).unwrap_or(i64::MAX);
        let token = new_token();

        let conn = self.conn.lock().unwrap();
        // Read only feeds the reclamation warning; the upsert alone decides.
        let prior: Option<i64> = conn
            .query_row(
                "SELECT acquired_at FROM task_locks WHERE kind = ?1",
                rusqlite::params![kind.as_str()],
                |row| row.get(0),
            )
            .optional()?;

        let claimed = conn.execute(
            "INSERT INTO task_locks (kind, pid, token, acquired_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(kind) DO UPDATE SET
                 pid = excluded.pid,
                 token = excluded.token,
                 acquired_at = excluded.acquired_at
             WHERE task_locks.acquired_at < ?5",
            rusqlite::params![kind.as_str(), std::process::id(), token, now, cutoff],
        )?;

        if claimed == 0 {
            tracing::info!(kind = %kind, "Lock busy, another attempt in flight");
            return Ok(Acquire::Busy);
        }
        if prior.is_some_and(|acquired_at| acquired_at < cutoff) {
            tracing::warn!(kind = %kind, "Reclaimed stale lock (prior attempt presumed dead)");
        }
        tracing::debug!(kind = %kind, "Lock acquired");
        Ok(Acquire::Acquired(LockHandle {
            conn: self.conn.clone(),
            kind,
            token,
        }))
    }

    #[cfg(test)]
    fn backdate(&self, kind: TaskKind, by: Duration) {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE task_locks SET acquired_at = acquired_at - ?2 WHERE kind = ?1",
            rusqlite::params![kind.as_str(), i64::try_from(by.as_secs()).unwrap()],
        )
        .unwrap();
    }
}

fn new_token() -> String {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    format!("{}-{nanos}", std::process::id())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;

    const KIND: TaskKind = TaskKind::MorningCheckin;
    const STALE: Duration = Duration::from_secs(1800);

    fn acquired(locks: &TaskLock, kind: TaskKind) -> LockHandle {
        match locks.try_acquire(kind).unwrap() {
            Acquire::Acquired(handle) => handle,
            Acquire::Busy => panic!("expected to acquire {kind}"),
        }
    }

    #[test]
    fn test_acquire_then_busy() {
        let locks = TaskLock::open_in_memory(STALE).unwrap();
        let _held = acquired(&locks, KIND);
        assert!(locks.try_acquire(KIND).unwrap().is_busy());
    }

    #[test]
    fn test_different_kinds_do_not_contend() {
        let locks = TaskLock::open_in_memory(STALE).unwrap();
        let _checkin = acquired(&locks, TaskKind::MorningCheckin);
        assert!(!locks.try_acquire(TaskKind::DailyReport).unwrap().is_busy());
    }

    #[test]
    fn test_drop_releases() {
        let locks = TaskLock::open_in_memory(STALE).unwrap();
        drop(acquired(&locks, KIND));
        assert!(!locks.try_acquire(KIND).unwrap().is_busy());
    }

    #[test]
    fn test_stale_claim_is_reclaimed() {
        let locks = TaskLock::open_in_memory(Duration::from_secs(60)).unwrap();
        // A claim whose holder died without releasing
        std::mem::forget(acquired(&locks, KIND));
        locks.backdate(KIND, Duration::from_secs(7200));

        assert!(!locks.try_acquire(KIND).unwrap().is_busy());
    }

    #[test]
    fn test_fresh_foreign_claim_is_respected() {
        let locks = TaskLock::open_in_memory(Duration::from_secs(60)).unwrap();
        std::mem::forget(acquired(&locks, KIND));
        assert!(locks.try_acquire(KIND).unwrap().is_busy());
    }

    #[test]
    fn test_release_after_steal_does_not_free_successor() {
        let locks = TaskLock::open_in_memory(Duration::from_secs(60)).unwrap();
        let first = acquired(&locks, KIND);
        locks.backdate(KIND, Duration::from_secs(7200));

        // Successor steals the stale claim; the original holder then exits
        let _second = acquired(&locks, KIND);
        drop(first);

        // Token guard: the stale holder's release must not delete the
        // successor's claim
        assert!(locks.try_acquire(KIND).unwrap().is_busy());
    }

    #[test]
    fn test_concurrent_acquire_has_one_winner() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("locks.db");
        let barrier = Arc::new(Barrier::new(8));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let db_path = db_path.clone();
            let barrier = barrier.clone();
            handles.push(std::thread::spawn(move || {
                let locks = TaskLock::open(&db_path, STALE).unwrap();
                barrier.wait();
                match locks.try_acquire(KIND).unwrap() {
                    Acquire::Acquired(handle) => {
                        std::thread::sleep(Duration::from_millis(50));
                        drop(handle);
                        1
                    }
                    Acquire::Busy => 0,
                }
            }));
        }

        let winners: i32 = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(winners, 1);
    }

    #[test]
    fn test_concurrent_stale_reclaim_has_one_winner() {
        // Several attempts racing to reclaim the same stale claim must still
        // produce exactly one holder per round.
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("locks.db");
        let seeder = TaskLock::open(&db_path, Duration::from_secs(60)).unwrap();

        for round in 0..25 {
            std::mem::forget(acquired(&seeder, KIND));
            seeder.backdate(KIND, Duration::from_secs(7200));

            let barrier = Arc::new(Barrier::new(4));
            let mut handles = Vec::new();
            for _ in 0..4 {
                let db_path = db_path.clone();
                let barrier = barrier.clone();
                handles.push(std::thread::spawn(move || {
                    let locks = TaskLock::open(&db_path, Duration::from_secs(60)).unwrap();
                    barrier.wait();
                    match locks.try_acquire(KIND).unwrap() {
                        Acquire::Acquired(handle) => {
                            std::thread::sleep(Duration::from_millis(5));
                            drop(handle);
                            1
                        }
                        Acquire::Busy => 0,
                    }
                }));
            }

            let winners: i32 = handles.into_iter().map(|h| h.join().unwrap()).sum();
            assert_eq!(winners, 1, "round {round}: expected exactly one holder");
        }
    }
}
