use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ──────────────────── Task Types ────────────────────

/// The fixed set of schedulable tasks.
///
/// The string form (`morning-checkin`, …) is the stable identifier used as the
/// ledger key, the lock-file name, the CLI argument, and the config key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskKind {
    MorningCheckin,
    EveningCheckin,
    DailyReport,
}

impl TaskKind {
    /// All task kinds, in schedule order.
    pub const ALL: [TaskKind; 3] = [
        TaskKind::MorningCheckin,
        TaskKind::EveningCheckin,
        TaskKind::DailyReport,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::MorningCheckin => "morning-checkin",
            TaskKind::EveningCheckin => "evening-checkin",
            TaskKind::DailyReport => "daily-report",
        }
    }

    /// Human-readable label for notifications.
    pub fn label(&self) -> &'static str {
        match self {
            TaskKind::MorningCheckin => "Morning check-in",
            TaskKind::EveningCheckin => "Evening check-in",
            TaskKind::DailyReport => "Daily report",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown task kind: {0}")]
pub struct UnknownTaskKind(String);

impl FromStr for TaskKind {
    type Err = UnknownTaskKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "morning-checkin" => Ok(TaskKind::MorningCheckin),
            "evening-checkin" => Ok(TaskKind::EveningCheckin),
            "daily-report" => Ok(TaskKind::DailyReport),
            other => Err(UnknownTaskKind(other.to_string())),
        }
    }
}

// ──────────────────── Outcome Types ────────────────────

/// Terminal status of one task attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Success,
    Failure,
}

impl OutcomeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeStatus::Success => "success",
            OutcomeStatus::Failure => "failure",
        }
    }
}

impl fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one task attempt, as reported by the executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outcome {
    pub status: OutcomeStatus,
    /// Human-readable detail, forwarded to notifications and the ledger.
    pub message: String,
}

impl Outcome {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            status: OutcomeStatus::Success,
            message: message.into(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            status: OutcomeStatus::Failure,
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Success
    }
}

// ──────────────────── Notification Types ────────────────────

/// Severity of an outbound notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Error,
}
