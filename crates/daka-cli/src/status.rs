//! `daka status` — today's run records at a glance.

use anyhow::Context;
use chrono::Utc;

use daka_ledger::RunLedger;

pub fn run_status() -> anyhow::Result<()> {
    let config = daka_config::load_config().context("failed to load configuration")?;
    let offset = config.offset()?;
    let today = Utc::now().with_timezone(&offset).date_naive();

    let ledger_path = config.ledger_path()?;
    if !ledger_path.exists() {
        println!("No ledger at {} yet; nothing has run.", ledger_path.display());
        return Ok(());
    }

    let ledger = RunLedger::open(&ledger_path).context("failed to open run ledger")?;
    let records = ledger.records_for(today)?;

    println!("Run records for {today}:");
    if records.is_empty() {
        println!("  (none)");
        return Ok(());
    }
    for record in records {
        println!(
            "  {} {:<16} {:<7} {}",
            record.recorded_at.with_timezone(&offset).format("%H:%M:%S"),
            record.kind,
            record.status,
            record.message
        );
    }
    Ok(())
}
