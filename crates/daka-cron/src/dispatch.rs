//! Dispatch sequence for one task firing: ledger check, lock, execute,
//! record, release, notify.

use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{error, info};

use daka_exec::TaskRunner;
use daka_guard::{Acquire, GuardError, TaskLock};
use daka_ledger::{LedgerError, RunLedger};
use daka_notify::Notifier;
use daka_types::{Outcome, Severity, TaskKind};

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Guard(#[from] GuardError),
}

/// What became of one firing.
#[derive(Debug)]
pub enum DispatchResult {
    /// A success record for today already exists; the executor was not called.
    AlreadyDone,
    /// Another attempt holds the lock; the executor was not called.
    Busy,
    /// The executor ran to this outcome, now recorded in the ledger.
    Ran(Outcome),
}

/// Routes a firing through the guard and ledger around the task executor.
pub struct Dispatcher {
    ledger: Arc<RunLedger>,
    guard: Arc<TaskLock>,
    runner: Arc<dyn TaskRunner>,
    notifier: Arc<dyn Notifier>,
}

impl Dispatcher {
    pub fn new(
        ledger: Arc<RunLedger>,
        guard: Arc<TaskLock>,
        runner: Arc<dyn TaskRunner>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            ledger,
            guard,
            runner,
            notifier,
        }
    }

    /// Run one attempt of `kind` for `today`.
    ///
    /// `AlreadyDone` and `Busy` are normal skips, not errors. The outcome is
    /// recorded and the lock released before the (best-effort) notification,
    /// so a hung notification channel cannot hold the lock.
    pub async fn dispatch(
        &self,
        kind: TaskKind,
        today: NaiveDate,
    ) -> Result<DispatchResult, DispatchError> {
        if self.ledger.has_succeeded_today(kind, today)? {
            info!(kind = %kind, "Already succeeded today, skipping");
            return Ok(DispatchResult::AlreadyDone);
        }

        let handle = match self.guard.try_acquire(kind)? {
            Acquire::Acquired(handle) => handle,
            Acquire::Busy => return Ok(DispatchResult::Busy),
        };

        info!(kind = %kind, date = %today, "Starting task");
        let outcome = self.runner.execute(kind).await;
        self.ledger.record(kind, today, &outcome)?;
        drop(handle);

        let (title, severity) = if outcome.is_success() {
            info!(kind = %kind, "Task succeeded: {}", outcome.message);
            (format!("{} succeeded", kind.label()), Severity::Info)
        } else {
            error!(kind = %kind, "Task failed: {}", outcome.message);
            (format!("{} failed", kind.label()), Severity::Error)
        };
        self.notifier.notify(&title, &outcome.message, severity).await;

        Ok(DispatchResult::Ran(outcome))
    }
}
