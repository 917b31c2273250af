// Data models for pomotrack

use crate::error::{ConfigError, DateKeyError, OutcomeError};
use crate::record::{IndexValue, Record, Scope};
use chrono::{DateTime, Datelike, Local, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;

/// ID of the single settings record
pub const CONFIG_ID: &str = "settings";

/// ID of the single timer state record
pub const RUN_STATE_ID: &str = "timer";

/// User-tunable settings (sync scope)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub work_minutes: u32,
    pub short_break_minutes: u32,
    pub long_break_minutes: u32,
    /// Work sessions per long-break cycle
    pub cycles: u32,
    pub daily_goal: u32,
    pub weekly_goal: u32,
    pub sound_enabled: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            work_minutes: 25,
            short_break_minutes: 5,
            long_break_minutes: 15,
            cycles: 4,
            daily_goal: 4,
            weekly_goal: 20,
            sound_enabled: true,
        }
    }
}

impl Config {
    /// Reject non-positive durations and cycle counts. Goals may be zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("work_minutes", self.work_minutes),
            ("short_break_minutes", self.short_break_minutes),
            ("long_break_minutes", self.long_break_minutes),
            ("cycles", self.cycles),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(ConfigError::NonPositive { field, value });
            }
        }
        Ok(())
    }
}

impl Record for Config {
    fn id(&self) -> String {
        CONFIG_ID.to_string()
    }

    fn collection_name() -> &'static str {
        "config"
    }

    fn scope() -> Scope {
        Scope::Sync
    }
}

/// Which kind of phase the timer is in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Work,
    Break,
}

impl Phase {
    pub fn is_work(self) -> bool {
        self == Phase::Work
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Work => write!(f, "Work"),
            Phase::Break => write!(f, "Break"),
        }
    }
}

/// Mutable timer state (local scope)
///
/// The timer is running exactly when `start_time` is set, so the running flag
/// is derived rather than stored and cannot disagree with it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunState {
    pub phase: Phase,
    /// Length of the current phase; after a pause, the rounded-up remainder
    pub duration_minutes: u32,
    /// Epoch milliseconds when the current run began
    pub start_time: Option<i64>,
    /// Work sessions completed since the last reset
    pub completed_cycles: u32,
}

impl RunState {
    /// Stopped at the start of a work phase with no completed cycles
    pub fn initial(config: &Config) -> Self {
        Self {
            phase: Phase::Work,
            duration_minutes: config.work_minutes,
            start_time: None,
            completed_cycles: 0,
        }
    }

    pub fn is_running(&self) -> bool {
        self.start_time.is_some()
    }

    pub fn is_work_phase(&self) -> bool {
        self.phase.is_work()
    }

    pub fn duration_ms(&self) -> i64 {
        i64::from(self.duration_minutes) * 60_000
    }
}

impl Default for RunState {
    fn default() -> Self {
        Self::initial(&Config::default())
    }
}

impl Record for RunState {
    fn id(&self) -> String {
        RUN_STATE_ID.to_string()
    }

    fn collection_name() -> &'static str {
        "run_state"
    }
}

/// Calendar day in local time, written as `YYYY-MM-DD`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DateKey(NaiveDate);

impl DateKey {
    pub fn new(date: NaiveDate) -> Self {
        Self(date)
    }

    /// The local calendar day containing an epoch-millisecond instant
    pub fn from_millis(ms: i64) -> Self {
        let date = DateTime::<Utc>::from_timestamp_millis(ms)
            .map(|utc| utc.with_timezone(&Local).date_naive())
            .unwrap_or_else(|| Local::now().date_naive());
        Self(date)
    }

    pub fn today() -> Self {
        Self(Local::now().date_naive())
    }

    pub fn date(self) -> NaiveDate {
        self.0
    }

    pub fn year(self) -> i32 {
        self.0.year()
    }

    fn indexed_fields(self) -> HashMap<String, IndexValue> {
        let mut fields = HashMap::new();
        fields.insert("date".to_string(), IndexValue::String(self.to_string()));
        fields.insert("year".to_string(), IndexValue::Int(i64::from(self.year())));
        fields
    }
}

impl From<NaiveDate> for DateKey {
    fn from(date: NaiveDate) -> Self {
        Self(date)
    }
}

impl std::fmt::Display for DateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d"))
    }
}

impl FromStr for DateKey {
    type Err = DateKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
            .map(Self)
            .map_err(|_| DateKeyError(s.to_string()))
    }
}

/// User-asserted quality of a finished session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeTag {
    Productive,
    Interrupted,
}

impl std::fmt::Display for OutcomeTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutcomeTag::Productive => write!(f, "productive"),
            OutcomeTag::Interrupted => write!(f, "interrupted"),
        }
    }
}

impl FromStr for OutcomeTag {
    type Err = OutcomeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "productive" => Ok(OutcomeTag::Productive),
            "interrupted" => Ok(OutcomeTag::Interrupted),
            _ => Err(OutcomeError(s.to_string())),
        }
    }
}

/// Completed work sessions on one day (local scope, collection `stats`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayCount {
    pub date: DateKey,
    pub count: u32,
}

impl DayCount {
    pub fn empty(date: DateKey) -> Self {
        Self { date, count: 0 }
    }
}

impl Record for DayCount {
    fn id(&self) -> String {
        self.date.to_string()
    }

    fn collection_name() -> &'static str {
        "stats"
    }

    fn indexed_fields(&self) -> HashMap<String, IndexValue> {
        self.date.indexed_fields()
    }
}

/// Outcome tags recorded on one day, in the order they were given
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayOutcomes {
    pub date: DateKey,
    pub tags: Vec<OutcomeTag>,
}

impl DayOutcomes {
    pub fn empty(date: DateKey) -> Self {
        Self {
            date,
            tags: Vec::new(),
        }
    }
}

impl Record for DayOutcomes {
    fn id(&self) -> String {
        self.date.to_string()
    }

    fn collection_name() -> &'static str {
        "outcomes"
    }

    fn indexed_fields(&self) -> HashMap<String, IndexValue> {
        self.date.indexed_fields()
    }
}

/// Current time in epoch milliseconds
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}
