//! Scheduler and one-shot execution paths.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use daka_config::DakaConfig;
use daka_cron::dispatch::{DispatchResult, Dispatcher};
use daka_cron::scheduler::Scheduler;
use daka_cron::{ScheduleState, Trigger};
use daka_exec::CommandRunner;
use daka_guard::TaskLock;
use daka_ledger::RunLedger;
use daka_notify::{NoopNotifier, Notifier, WxPusher};
use daka_types::TaskKind;

/// Load, env-override, and fail-fast validate the configuration.
fn load_validated_config() -> anyhow::Result<DakaConfig> {
    let config = daka_config::load_config().context("failed to load configuration")?;
    config.validate().context("invalid configuration")?;
    Ok(config)
}

/// Wire ledger, guard, runner, and notifier into a dispatcher.
fn build_dispatcher(config: &DakaConfig) -> anyhow::Result<(Arc<Dispatcher>, Arc<RunLedger>)> {
    daka_config::ensure_data_dir(config).context("failed to create data directory")?;

    let ledger = Arc::new(
        RunLedger::open(&config.ledger_path()?).context("failed to open run ledger")?,
    );
    let guard = Arc::new(
        TaskLock::open(
            &config.lock_db_path()?,
            Duration::from_secs(config.lock_stale_minutes * 60),
        )
        .context("failed to open lock store")?,
    );
    let runner = Arc::new(CommandRunner::new(
        config.tasks.clone(),
        vec![
            ("CHECKIN_USERNAME".to_string(), config.username.clone()),
            ("CHECKIN_PASSWORD".to_string(), config.password.clone()),
        ],
        Duration::from_secs(config.task_timeout_secs),
    ));
    let notifier: Arc<dyn Notifier> = if config.wxpusher.is_configured() {
        Arc::new(WxPusher::new(
            config.wxpusher.app_token.clone(),
            config.wxpusher.uid.clone(),
        ))
    } else {
        warn!("WxPusher not configured, outcome notifications disabled");
        Arc::new(NoopNotifier)
    };

    let dispatcher = Arc::new(Dispatcher::new(ledger.clone(), guard, runner, notifier));
    Ok((dispatcher, ledger))
}

fn triggers_from(config: &DakaConfig) -> anyhow::Result<Vec<Trigger>> {
    TaskKind::ALL
        .into_iter()
        .map(|kind| {
            let t = config.schedule.time_for(kind);
            Trigger::new(kind, t.hour, t.minute).map_err(Into::into)
        })
        .collect()
}

/// Continuous mode: tick forever, stop gracefully on ctrl-c.
pub async fn run_scheduler() -> anyhow::Result<()> {
    let config = load_validated_config()?;
    let offset = config.offset()?;
    let (dispatcher, ledger) = build_dispatcher(&config)?;

    // Retention housekeeping, not load-bearing for correctness
    let today = Utc::now().with_timezone(&offset).date_naive();
    let cutoff = today - chrono::Duration::days(i64::from(config.retention_days));
    if let Err(e) = ledger.prune_before(cutoff) {
        warn!("Ledger prune failed: {e}");
    }

    let scheduler = Scheduler::new(
        dispatcher,
        offset,
        Duration::from_secs(config.tick_interval_secs),
        Duration::from_secs(config.shutdown_grace_secs),
    );

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutdown signal received");
                cancel.cancel();
            }
        });
    }

    if config.run_on_startup {
        scheduler.run_startup_tasks().await;
    }

    let state = ScheduleState::new(
        triggers_from(&config)?,
        Duration::from_secs(config.misfire_grace_secs),
    );
    scheduler.run(state, cancel).await;
    Ok(())
}

/// One-shot mode: a single dispatch, exit code reflecting the task outcome.
pub async fn run_once(kind: TaskKind) -> anyhow::Result<()> {
    let config = load_validated_config()?;
    let offset = config.offset()?;
    let (dispatcher, _ledger) = build_dispatcher(&config)?;

    let today = Utc::now().with_timezone(&offset).date_naive();
    match dispatcher.dispatch(kind, today).await? {
        DispatchResult::AlreadyDone => {
            info!(kind = %kind, "Already succeeded today, nothing to do");
            Ok(())
        }
        DispatchResult::Busy => {
            info!(kind = %kind, "Another attempt is in flight, skipping");
            Ok(())
        }
        DispatchResult::Ran(outcome) if outcome.is_success() => Ok(()),
        DispatchResult::Ran(outcome) => bail!("{kind} failed: {}", outcome.message),
    }
}
