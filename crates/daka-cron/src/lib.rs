//! daka-cron: the recurring-task scheduling core.
//!
//! Triggers bind a task kind to a wall-clock time of day in a fixed civil
//! offset. `ScheduleState` is an owned value driven by an injected `now`, so
//! tick evaluation is a pure function under test. Daily duplicate suppression
//! across restarts lives in the ledger; the in-memory fired marker only stops
//! re-firing within the same minute.

pub mod dispatch;
pub mod scheduler;

use std::time::Duration;

use chrono::{DateTime, FixedOffset, NaiveDate, Timelike};

use daka_types::TaskKind;

#[derive(Debug, thiserror::Error)]
pub enum CronError {
    #[error("Invalid trigger time {hour:02}:{minute:02} for '{kind}' (hour must be 0-23, minute 0-59)")]
    InvalidTriggerTime {
        kind: TaskKind,
        hour: u8,
        minute: u8,
    },
}

/// A (task kind, time-of-day) binding. Several triggers may share a kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Trigger {
    pub kind: TaskKind,
    pub hour: u8,
    pub minute: u8,
}

impl Trigger {
    /// Validated constructor; out-of-range times fail fast, never clamp.
    pub fn new(kind: TaskKind, hour: u8, minute: u8) -> Result<Self, CronError> {
        if hour > 23 || minute > 59 {
            return Err(CronError::InvalidTriggerTime { kind, hour, minute });
        }
        Ok(Self { kind, hour, minute })
    }
}

struct Entry {
    trigger: Trigger,
    /// Last civil date this trigger fired; suppresses duplicate ticks within
    /// the trigger minute. Dies with the process by design.
    fired_on: Option<NaiveDate>,
}

/// The process-wide trigger set and per-trigger fired markers.
pub struct ScheduleState {
    entries: Vec<Entry>,
    /// Whole minutes past its own minute a trigger may still fire.
    grace_minutes: u32,
}

impl ScheduleState {
    /// `misfire_grace` lets a trigger fire late when a stall or restart
    /// spans its minute; the first tick within `[trigger, trigger + grace]`
    /// catches up. Zero means strict minute matching.
    pub fn new(triggers: Vec<Trigger>, misfire_grace: Duration) -> Self {
        Self {
            entries: triggers
                .into_iter()
                .map(|trigger| Entry {
                    trigger,
                    fired_on: None,
                })
                .collect(),
            grace_minutes: u32::try_from(misfire_grace.as_secs() / 60).unwrap_or(u32::MAX),
        }
    }

    pub fn triggers(&self) -> impl Iterator<Item = &Trigger> {
        self.entries.iter().map(|e| &e.trigger)
    }

    /// Kinds due at `now`: every trigger whose minute has arrived today (no
    /// more than the grace window ago) and which has not yet fired today.
    /// Marks matched triggers fired, so a second tick within the same window
    /// returns nothing. Two triggers for the same kind at the same time both
    /// fire; the guard breaks the tie.
    pub fn due(&mut self, now: DateTime<FixedOffset>) -> Vec<TaskKind> {
        let today = now.date_naive();
        let now_minute = now.hour() * 60 + now.minute();
        let mut due = Vec::new();
        for entry in &mut self.entries {
            let trigger_minute =
                u32::from(entry.trigger.hour) * 60 + u32::from(entry.trigger.minute);
            if now_minute >= trigger_minute
                && now_minute - trigger_minute <= self.grace_minutes
                && entry.fired_on != Some(today)
            {
                entry.fired_on = Some(today);
                due.push(entry.trigger.kind);
            }
        }
        due
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn beijing() -> FixedOffset {
        FixedOffset::east_opt(8 * 3600).unwrap()
    }

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<FixedOffset> {
        beijing().with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    fn checkin_at_8(grace: Duration) -> ScheduleState {
        ScheduleState::new(
            vec![Trigger::new(TaskKind::MorningCheckin, 8, 0).unwrap()],
            grace,
        )
    }

    #[test]
    fn test_trigger_rejects_out_of_range() {
        assert!(Trigger::new(TaskKind::MorningCheckin, 24, 0).is_err());
        assert!(Trigger::new(TaskKind::MorningCheckin, 8, 60).is_err());
        assert!(Trigger::new(TaskKind::MorningCheckin, 23, 59).is_ok());
    }

    #[test]
    fn test_fires_within_the_trigger_minute() {
        let mut state = checkin_at_8(Duration::ZERO);
        assert!(state.due(at(2024, 5, 1, 7, 59, 59)).is_empty());
        assert_eq!(
            state.due(at(2024, 5, 1, 8, 0, 23)),
            vec![TaskKind::MorningCheckin]
        );
        assert!(state.due(at(2024, 5, 1, 8, 1, 0)).is_empty());
    }

    #[test]
    fn test_duplicate_tick_in_same_minute_fires_once() {
        let mut state = checkin_at_8(Duration::ZERO);
        assert_eq!(state.due(at(2024, 5, 1, 8, 0, 10)).len(), 1);
        assert!(state.due(at(2024, 5, 1, 8, 0, 40)).is_empty());
    }

    #[test]
    fn test_refires_the_next_day() {
        let mut state = checkin_at_8(Duration::ZERO);
        assert_eq!(state.due(at(2024, 5, 1, 8, 0, 0)).len(), 1);
        assert_eq!(
            state.due(at(2024, 5, 2, 8, 0, 0)),
            vec![TaskKind::MorningCheckin]
        );
    }

    #[test]
    fn test_misfire_grace_catches_late_tick() {
        // Downtime spanning the trigger minute: the first tick afterwards
        // still fires, up to the grace window.
        let mut state = checkin_at_8(Duration::from_secs(300));
        assert_eq!(
            state.due(at(2024, 5, 1, 8, 3, 20)),
            vec![TaskKind::MorningCheckin]
        );

        let mut state = checkin_at_8(Duration::from_secs(300));
        assert_eq!(state.due(at(2024, 5, 1, 8, 5, 59)).len(), 1);

        let mut state = checkin_at_8(Duration::from_secs(300));
        assert!(state.due(at(2024, 5, 1, 8, 6, 0)).is_empty());
    }

    #[test]
    fn test_misfire_grace_fires_once_per_day() {
        let mut state = checkin_at_8(Duration::from_secs(300));
        assert_eq!(state.due(at(2024, 5, 1, 8, 0, 5)).len(), 1);
        assert!(state.due(at(2024, 5, 1, 8, 3, 5)).is_empty());
    }

    #[test]
    fn test_zero_grace_is_strict_minute_match() {
        let mut state = checkin_at_8(Duration::ZERO);
        assert!(state.due(at(2024, 5, 1, 8, 1, 0)).is_empty());
        assert!(state.due(at(2024, 5, 1, 8, 4, 0)).is_empty());
    }

    #[test]
    fn test_same_kind_same_time_fires_twice() {
        // Both firings reach the dispatcher; the guard skips the loser.
        let mut state = ScheduleState::new(
            vec![
                Trigger::new(TaskKind::DailyReport, 17, 30).unwrap(),
                Trigger::new(TaskKind::DailyReport, 17, 30).unwrap(),
            ],
            Duration::ZERO,
        );
        assert_eq!(
            state.due(at(2024, 5, 1, 17, 30, 0)),
            vec![TaskKind::DailyReport, TaskKind::DailyReport]
        );
    }

    #[test]
    fn test_distinct_kinds_fire_independently() {
        let mut state = ScheduleState::new(
            vec![
                Trigger::new(TaskKind::EveningCheckin, 17, 0).unwrap(),
                Trigger::new(TaskKind::DailyReport, 17, 30).unwrap(),
            ],
            Duration::ZERO,
        );
        assert_eq!(
            state.due(at(2024, 5, 1, 17, 0, 5)),
            vec![TaskKind::EveningCheckin]
        );
        assert_eq!(
            state.due(at(2024, 5, 1, 17, 30, 5)),
            vec![TaskKind::DailyReport]
        );
    }
}
