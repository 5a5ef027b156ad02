mod run;
mod status;

use clap::{Parser, Subcommand};

use daka_types::TaskKind;

#[derive(Parser)]
#[command(name = "daka", about = "Daily check-in and report automation")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the continuous scheduler (ticks forever, ctrl-c to stop)
    Scheduler,
    /// Run a single task immediately, through the same lock and ledger
    Once {
        /// Task kind: morning-checkin, evening-checkin, or daily-report
        task: String,
    },
    /// Shortcut for `once morning-checkin`
    MorningCheckin,
    /// Shortcut for `once evening-checkin`
    EveningCheckin,
    /// Shortcut for `once daily-report`
    DailyReport,
    /// Show today's run records
    Status,
}

fn run_once_blocking(kind: TaskKind) -> anyhow::Result<()> {
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run::run_once(kind))
}

fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Scheduler => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(run::run_scheduler())?;
        }
        Commands::Once { task } => {
            let kind: TaskKind = task
                .parse()
                .map_err(|e| anyhow::anyhow!("{e} (expected one of: morning-checkin, evening-checkin, daily-report)"))?;
            run_once_blocking(kind)?;
        }
        Commands::MorningCheckin => run_once_blocking(TaskKind::MorningCheckin)?,
        Commands::EveningCheckin => run_once_blocking(TaskKind::EveningCheckin)?,
        Commands::DailyReport => run_once_blocking(TaskKind::DailyReport)?,
        Commands::Status => {
            status::run_status()?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shortcut_subcommands_parse() {
        for name in ["morning-checkin", "evening-checkin", "daily-report"] {
            let cli = Cli::try_parse_from(["daka", name])
                .unwrap_or_else(|e| panic!("`daka {name}` should parse: {e}"));
            assert!(matches!(
                cli.command,
                Commands::MorningCheckin | Commands::EveningCheckin | Commands::DailyReport
            ));
        }
    }

    #[test]
    fn test_shortcut_matches_once_form() {
        let short = Cli::try_parse_from(["daka", "daily-report"]).unwrap();
        assert!(matches!(short.command, Commands::DailyReport));

        let long = Cli::try_parse_from(["daka", "once", "daily-report"]).unwrap();
        match long.command {
            Commands::Once { task } => {
                assert_eq!(task.parse::<TaskKind>().unwrap(), TaskKind::DailyReport)
            }
            _ => panic!("expected the once subcommand"),
        }
    }
}
