//! Tick loop driving trigger evaluation and dispatch.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, Timelike, Utc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use daka_types::TaskKind;

use crate::ScheduleState;
use crate::dispatch::Dispatcher;

/// Continuous scheduler: polls the wall clock and dispatches due triggers.
///
/// Polling self-heals across brief downtime (a missed tick is caught by the
/// next one within the same minute) at the cost of tick-interval granularity.
pub struct Scheduler {
    dispatcher: Arc<Dispatcher>,
    offset: FixedOffset,
    tick_interval: Duration,
    shutdown_grace: Duration,
}

impl Scheduler {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        offset: FixedOffset,
        tick_interval: Duration,
        shutdown_grace: Duration,
    ) -> Self {
        Self {
            dispatcher,
            offset,
            tick_interval,
            shutdown_grace,
        }
    }

    fn now(&self) -> DateTime<FixedOffset> {
        Utc::now().with_timezone(&self.offset)
    }

    /// Run the tick loop until `cancel` fires, then drain in-flight
    /// dispatches for a bounded grace period.
    pub async fn run(&self, mut state: ScheduleState, cancel: CancellationToken) {
        info!(
            "Scheduler started at {} (tick every {}s)",
            self.now().format("%Y-%m-%d %H:%M:%S %:z"),
            self.tick_interval.as_secs()
        );
        for trigger in state.triggers() {
            info!(
                "  trigger: {} at {:02}:{:02}",
                trigger.kind, trigger.hour, trigger.minute
            );
        }

        let mut inflight: JoinSet<()> = JoinSet::new();
        loop {
            let now = self.now();
            for kind in state.due(now) {
                let dispatcher = self.dispatcher.clone();
                let today = now.date_naive();
                inflight.spawn(async move {
                    if let Err(e) = dispatcher.dispatch(kind, today).await {
                        error!(kind = %kind, "Dispatch failed: {e}");
                    }
                });
            }

            // Reap completed dispatches so the set stays small
            while let Some(result) = inflight.try_join_next() {
                if let Err(e) = result {
                    error!("Dispatch task panicked: {e}");
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.tick_interval) => {}
            }
        }

        if !inflight.is_empty() {
            info!(
                "Shutdown requested, waiting up to {}s for {} in-flight task(s)",
                self.shutdown_grace.as_secs(),
                inflight.len()
            );
            let drain = async {
                while inflight.join_next().await.is_some() {}
            };
            if tokio::time::timeout(self.shutdown_grace, drain).await.is_err() {
                warn!("Grace period elapsed, abandoning in-flight tasks (stale locks will be reclaimed)");
                inflight.abort_all();
            }
        }
        info!("Scheduler stopped");
    }

    /// Immediate boot-time catch-up: a time-appropriate check-in plus the
    /// daily report, through the normal guard/ledger path.
    pub async fn run_startup_tasks(&self) {
        let now = self.now();
        info!("Running startup catch-up tasks");
        for kind in startup_kinds(now) {
            if let Err(e) = self.dispatcher.dispatch(kind, now.date_naive()).await {
                error!(kind = %kind, "Startup dispatch failed: {e}");
            }
        }
    }
}

/// Which tasks a boot-time catch-up should attempt: the morning check-in
/// before the evening shift starts (the original treats 06:00-16:59 as the
/// morning window), the evening one otherwise, and always the daily report.
pub fn startup_kinds(now: DateTime<FixedOffset>) -> [TaskKind; 2] {
    let checkin = if (6..17).contains(&now.hour()) {
        TaskKind::MorningCheckin
    } else {
        TaskKind::EveningCheckin
    };
    [checkin, TaskKind::DailyReport]
}
