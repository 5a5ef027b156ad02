use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::FixedOffset;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use daka_types::TaskKind;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON5 parse error: {0}")]
    Json5(#[from] json5::Error),
    #[error("Config directory not found")]
    NoDirFound,
    #[error("Missing credentials: set username/password in config or CHECKIN_USERNAME/CHECKIN_PASSWORD")]
    MissingCredentials,
    #[error("No task command configured for '{0}'")]
    MissingTaskCommand(TaskKind),
    #[error("Invalid trigger time for '{kind}': {hour:02}:{minute:02} (hour must be 0-23, minute 0-59)")]
    InvalidTriggerTime { kind: TaskKind, hour: u8, minute: u8 },
    #[error("Invalid UTC offset '{0}': expected +HH:MM or -HH:MM")]
    InvalidUtcOffset(String),
    #[error("Invalid value for environment variable {name}: {value}")]
    InvalidEnvVar { name: String, value: String },
}

/// Wall-clock time of day for a trigger, in the configured offset.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TimeOfDay {
    pub hour: u8,
    pub minute: u8,
}

impl TimeOfDay {
    pub const fn new(hour: u8, minute: u8) -> Self {
        Self { hour, minute }
    }
}

/// Daily schedule: one trigger time per task kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    #[serde(default = "default_morning_checkin")]
    pub morning_checkin: TimeOfDay,
    #[serde(default = "default_evening_checkin")]
    pub evening_checkin: TimeOfDay,
    #[serde(default = "default_daily_report")]
    pub daily_report: TimeOfDay,
}

fn default_morning_checkin() -> TimeOfDay {
    TimeOfDay::new(8, 0)
}

fn default_evening_checkin() -> TimeOfDay {
    TimeOfDay::new(17, 0)
}

fn default_daily_report() -> TimeOfDay {
    TimeOfDay::new(17, 30)
}

impl Default for Schedule {
    fn default() -> Self {
        Self {
            morning_checkin: default_morning_checkin(),
            evening_checkin: default_evening_checkin(),
            daily_report: default_daily_report(),
        }
    }
}

impl Schedule {
    pub fn time_for(&self, kind: TaskKind) -> TimeOfDay {
        match kind {
            TaskKind::MorningCheckin => self.morning_checkin,
            TaskKind::EveningCheckin => self.evening_checkin,
            TaskKind::DailyReport => self.daily_report,
        }
    }
}

/// WxPusher notification settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WxPusherConfig {
    #[serde(default)]
    pub app_token: String,
    #[serde(default)]
    pub uid: String,
}

impl WxPusherConfig {
    pub fn is_configured(&self) -> bool {
        !self.app_token.is_empty() && !self.uid.is_empty()
    }
}

/// Top-level daka configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DakaConfig {
    /// Portal login username, handed to task commands via CHECKIN_USERNAME.
    #[serde(default)]
    pub username: String,
    /// Portal login password, handed to task commands via CHECKIN_PASSWORD.
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub wxpusher: WxPusherConfig,
    /// Civil offset the schedule is expressed in, e.g. "+08:00" for Beijing time.
    #[serde(default = "default_utc_offset")]
    pub utc_offset: String,
    #[serde(default)]
    pub schedule: Schedule,
    /// Shell command to run per task kind, keyed by the kind's string form.
    #[serde(default)]
    pub tasks: HashMap<TaskKind, String>,
    /// Directory holding ledger.db and locks/ (default ~/.daka).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,
    /// How long past its minute a trigger may still fire (covers restarts or
    /// stalls spanning the trigger minute).
    #[serde(default = "default_misfire_grace_secs")]
    pub misfire_grace_secs: u64,
    #[serde(default = "default_lock_stale_minutes")]
    pub lock_stale_minutes: u64,
    #[serde(default = "default_task_timeout_secs")]
    pub task_timeout_secs: u64,
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
    /// Run a time-appropriate check-in plus the report once at boot.
    #[serde(default)]
    pub run_on_startup: bool,
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

fn default_utc_offset() -> String {
    "+08:00".to_string()
}

fn default_tick_interval_secs() -> u64 {
    30
}

fn default_misfire_grace_secs() -> u64 {
    300
}

fn default_lock_stale_minutes() -> u64 {
    30
}

fn default_task_timeout_secs() -> u64 {
    600
}

fn default_shutdown_grace_secs() -> u64 {
    60
}

fn default_retention_days() -> u32 {
    30
}

impl Default for DakaConfig {
    fn default() -> Self {
        Self {
            username: String::new(),
            password: String::new(),
            wxpusher: WxPusherConfig::default(),
            utc_offset: default_utc_offset(),
            schedule: Schedule::default(),
            tasks: HashMap::new(),
            data_dir: None,
            tick_interval_secs: default_tick_interval_secs(),
            misfire_grace_secs: default_misfire_grace_secs(),
            lock_stale_minutes: default_lock_stale_minutes(),
            task_timeout_secs: default_task_timeout_secs(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
            run_on_startup: false,
            retention_days: default_retention_days(),
        }
    }
}

impl DakaConfig {
    /// Validate everything that must fail fast at startup: credentials, task
    /// commands, trigger time ranges, and the offset string. Never clamps.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.username.is_empty() || self.password.is_empty() {
            return Err(ConfigError::MissingCredentials);
        }
        for kind in TaskKind::ALL {
            let t = self.schedule.time_for(kind);
            if t.hour > 23 || t.minute > 59 {
                return Err(ConfigError::InvalidTriggerTime {
                    kind,
                    hour: t.hour,
                    minute: t.minute,
                });
            }
            match self.tasks.get(&kind) {
                Some(cmd) if !cmd.is_empty() => {}
                _ => return Err(ConfigError::MissingTaskCommand(kind)),
            }
        }
        self.offset()?;
        Ok(())
    }

    /// Parse the configured offset string into a chrono `FixedOffset`.
    pub fn offset(&self) -> Result<FixedOffset, ConfigError> {
        parse_utc_offset(&self.utc_offset)
    }

    pub fn command_for(&self, kind: TaskKind) -> Option<&str> {
        self.tasks.get(&kind).map(String::as_str)
    }

    /// Resolve the data directory (default ~/.daka).
    pub fn data_dir(&self) -> Result<PathBuf, ConfigError> {
        match &self.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => config_dir(),
        }
    }

    pub fn ledger_path(&self) -> Result<PathBuf, ConfigError> {
        Ok(self.data_dir()?.join("ledger.db"))
    }

    pub fn lock_db_path(&self) -> Result<PathBuf, ConfigError> {
        Ok(self.data_dir()?.join("locks.db"))
    }
}

/// Parse "+HH:MM" / "-HH:MM" into a `FixedOffset`.
pub fn parse_utc_offset(s: &str) -> Result<FixedOffset, ConfigError> {
    let err = || ConfigError::InvalidUtcOffset(s.to_string());
    let (sign, rest) = match s.as_bytes().first() {
        Some(b'+') => (1i32, &s[1..]),
        Some(b'-') => (-1i32, &s[1..]),
        _ => return Err(err()),
    };
    let (h, m) = rest.split_once(':').ok_or_else(err)?;
    let hours: i32 = h.parse().map_err(|_| err())?;
    let minutes: i32 = m.parse().map_err(|_| err())?;
    if hours > 23 || minutes > 59 {
        return Err(err());
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).ok_or_else(err)
}

/// Resolve the daka config directory (~/.daka/).
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    dirs::home_dir()
        .map(|h| h.join(".daka"))
        .ok_or(ConfigError::NoDirFound)
}

/// Resolve the config file path (~/.daka/config.json5, or $DAKA_CONFIG).
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    if let Ok(path) = std::env::var("DAKA_CONFIG") {
        return Ok(PathBuf::from(path));
    }
    Ok(config_dir()?.join("config.json5"))
}

/// Load configuration from the default path, then apply env overrides.
pub fn load_config() -> Result<DakaConfig, ConfigError> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    let path = config_file_path()?;
    let mut config = load_config_from(&path)?;
    apply_env_overrides(&mut config)?;
    Ok(config)
}

/// Load configuration from a specific path, falling back to defaults if not found.
pub fn load_config_from(path: &Path) -> Result<DakaConfig, ConfigError> {
    if !path.exists() {
        tracing::debug!("Config file not found at {}, using defaults", path.display());
        return Ok(DakaConfig::default());
    }

    let content = std::fs::read_to_string(path)?;
    let config: DakaConfig = json5::from_str(&content)?;
    Ok(config)
}

/// Environment overrides, matching the variable names the container images use.
pub fn apply_env_overrides(config: &mut DakaConfig) -> Result<(), ConfigError> {
    if let Ok(v) = std::env::var("CHECKIN_USERNAME") {
        config.username = v;
    }
    if let Ok(v) = std::env::var("CHECKIN_PASSWORD") {
        config.password = v;
    }
    if let Ok(v) = std::env::var("WXPUSHER_APP_TOKEN") {
        config.wxpusher.app_token = v;
    }
    if let Ok(v) = std::env::var("WXPUSHER_UID") {
        config.wxpusher.uid = v;
    }
    if let Ok(v) = std::env::var("RUN_ON_STARTUP") {
        config.run_on_startup = v.eq_ignore_ascii_case("true");
    }

    override_time_part("MORNING_CHECKIN_HOUR", &mut config.schedule.morning_checkin.hour)?;
    override_time_part("MORNING_CHECKIN_MINUTE", &mut config.schedule.morning_checkin.minute)?;
    override_time_part("EVENING_CHECKIN_HOUR", &mut config.schedule.evening_checkin.hour)?;
    override_time_part("EVENING_CHECKIN_MINUTE", &mut config.schedule.evening_checkin.minute)?;
    override_time_part("DAILY_REPORT_HOUR", &mut config.schedule.daily_report.hour)?;
    override_time_part("DAILY_REPORT_MINUTE", &mut config.schedule.daily_report.minute)?;

    Ok(())
}

fn override_time_part(name: &str, slot: &mut u8) -> Result<(), ConfigError> {
    if let Ok(value) = std::env::var(name) {
        *slot = value.parse().map_err(|_| ConfigError::InvalidEnvVar {
            name: name.to_string(),
            value,
        })?;
    }
    Ok(())
}

/// Ensure the data directory exists.
pub fn ensure_data_dir(config: &DakaConfig) -> Result<PathBuf, ConfigError> {
    let dir = config.data_dir()?;
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configured() -> DakaConfig {
        let mut config = DakaConfig {
            username: "user".into(),
            password: "pass".into(),
            ..DakaConfig::default()
        };
        for kind in TaskKind::ALL {
            config.tasks.insert(kind, format!("run-{kind}"));
        }
        config
    }

    #[test]
    fn test_default_schedule() {
        let config = DakaConfig::default();
        assert_eq!(config.schedule.morning_checkin.hour, 8);
        assert_eq!(config.schedule.evening_checkin.hour, 17);
        assert_eq!(config.schedule.daily_report.minute, 30);
        assert_eq!(config.utc_offset, "+08:00");
        assert_eq!(config.misfire_grace_secs, 300);
    }

    #[test]
    fn test_json5_parse() {
        let json5_str = r#"{
            username: "alice",
            password: "secret",
            schedule: {
                morning_checkin: { hour: 9, minute: 15 },
            },
            tasks: {
                "morning-checkin": "checkin --shift morning",
                "evening-checkin": "checkin --shift evening",
                "daily-report": "report",
            },
            tick_interval_secs: 20,
        }"#;
        let config: DakaConfig = json5::from_str(json5_str).unwrap();
        assert_eq!(config.schedule.morning_checkin.hour, 9);
        assert_eq!(config.schedule.morning_checkin.minute, 15);
        // Unspecified times keep their defaults
        assert_eq!(config.schedule.daily_report.hour, 17);
        assert_eq!(config.tick_interval_secs, 20);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_out_of_range_hour() {
        let mut config = configured();
        config.schedule.evening_checkin.hour = 24;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidTriggerTime {
                kind: TaskKind::EveningCheckin,
                ..
            })
        ));
    }

    #[test]
    fn test_validate_rejects_missing_credentials() {
        let mut config = configured();
        config.password.clear();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingCredentials)
        ));
    }

    #[test]
    fn test_validate_rejects_missing_task_command() {
        let mut config = configured();
        config.tasks.remove(&TaskKind::DailyReport);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingTaskCommand(TaskKind::DailyReport))
        ));
    }

    #[test]
    fn test_parse_utc_offset() {
        assert_eq!(
            parse_utc_offset("+08:00").unwrap(),
            FixedOffset::east_opt(8 * 3600).unwrap()
        );
        assert_eq!(
            parse_utc_offset("-05:30").unwrap(),
            FixedOffset::west_opt(5 * 3600 + 30 * 60).unwrap()
        );
        assert!(parse_utc_offset("08:00").is_err());
        assert!(parse_utc_offset("+25:00").is_err());
        assert!(parse_utc_offset("Asia/Shanghai").is_err());
    }
}
