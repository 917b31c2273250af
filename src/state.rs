// Typed state service over the record store

use crate::filter::Filter;
use crate::models::{CONFIG_ID, Config, DateKey, DayCount, DayOutcomes, OutcomeTag, RUN_STATE_ID, RunState};
use crate::record::{IndexValue, Scope};
use crate::stats::StatsHistory;
use crate::store::{Store, Txn};
use eyre::{Context, Result};
use std::path::Path;
use tracing::{debug, info};

/// Process-wide access to settings, timer state and session history
///
/// Each record group has an atomic read-modify-write path: settings in the
/// sync scope, timer state and history in the local scope. Missing settings
/// and timer state read as their defaults.
pub struct StateService {
    store: Store,
}

impl StateService {
    /// Open the store, pick up log edits made elsewhere and install defaults
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let store = Store::open(path)?;
        let mut state = Self { store };
        state.refresh()?;
        state.install_defaults()?;
        Ok(state)
    }

    pub fn base_path(&self) -> &Path {
        self.store.base_path()
    }

    /// Write default settings and an initial timer state where none exist.
    /// Returns true if anything was written.
    pub fn install_defaults(&mut self) -> Result<bool> {
        let config_written = self.store.transaction(Scope::Sync, |txn| {
            if txn.get::<Config>(CONFIG_ID)?.is_some() {
                return Ok(false);
            }
            txn.put(&Config::default())?;
            Ok(true)
        })?;

        let state_written = self.store.transaction(Scope::Local, |txn| {
            if txn.get::<RunState>(RUN_STATE_ID)?.is_some() {
                return Ok(false);
            }
            txn.put(&RunState::initial(&load_config(txn)?))?;
            Ok(true)
        })?;

        if config_written || state_written {
            info!(config_written, state_written, "Installed default state");
        }
        Ok(config_written || state_written)
    }

    // ========================================================================
    // Config
    // ========================================================================

    pub fn config(&self) -> Result<Config> {
        Ok(self.store.get::<Config>(CONFIG_ID)?.unwrap_or_default())
    }

    /// Validate and write a complete settings record
    pub fn save_config(&mut self, config: &Config) -> Result<()> {
        config.validate()?;
        self.store.put(config).context("Failed to save settings")?;
        info!(?config, "Saved settings");
        Ok(())
    }

    // ========================================================================
    // Timer state
    // ========================================================================

    pub fn run_state(&self) -> Result<RunState> {
        match self.store.get::<RunState>(RUN_STATE_ID)? {
            Some(state) => Ok(state),
            None => Ok(RunState::initial(&self.config()?)),
        }
    }

    /// Read, transform and write the timer state atomically
    pub fn update_run_state<F>(&mut self, f: F) -> Result<RunState>
    where
        F: FnOnce(RunState) -> Result<RunState>,
    {
        self.transaction(|txn| {
            let next = f(load_run_state(txn)?)?;
            txn.put(&next)?;
            Ok(next)
        })
    }

    /// Run a local-scope transaction covering timer state and history together
    pub fn transaction<R, F>(&mut self, f: F) -> Result<R>
    where
        F: FnOnce(&mut Txn<'_>) -> Result<R>,
    {
        self.store.transaction(Scope::Local, f)
    }

    // ========================================================================
    // History
    // ========================================================================

    /// Add completed sessions to a day. Returns the day's new count.
    pub fn credit_sessions(&mut self, date: DateKey, sessions: u32) -> Result<u32> {
        self.transaction(|txn| credit_day(txn, date, sessions))
    }

    /// Append an outcome tag to a day's log without touching its count
    pub fn record_outcome(&mut self, date: DateKey, tag: OutcomeTag) -> Result<DayOutcomes> {
        let day = self.store.modify::<DayOutcomes, _>(&date.to_string(), |current| {
            let mut day = current.unwrap_or_else(|| DayOutcomes::empty(date));
            day.tags.push(tag);
            Ok(day)
        })?;
        debug!(%date, %tag, tags = day.tags.len(), "Recorded session outcome");
        Ok(day)
    }

    pub fn stats_history(&self) -> Result<StatsHistory> {
        Ok(StatsHistory::from_records(
            self.store.list::<DayCount>(&[])?,
            self.store.list::<DayOutcomes>(&[])?,
        ))
    }

    pub fn stats_for_year(&self, year: i32) -> Result<StatsHistory> {
        let filter = [Filter::eq("year", IndexValue::Int(i64::from(year)))];
        Ok(StatsHistory::from_records(
            self.store.list::<DayCount>(&filter)?,
            self.store.list::<DayOutcomes>(&filter)?,
        ))
    }

    /// Delete every day count and outcome log. Returns the number of records removed.
    pub fn clear_stats_history(&mut self) -> Result<usize> {
        let removed = self.transaction(|txn| {
            let mut removed = 0;
            for day in txn.list::<DayCount>(&[])? {
                if txn.delete::<DayCount>(&day.date.to_string())? {
                    removed += 1;
                }
            }
            for day in txn.list::<DayOutcomes>(&[])? {
                if txn.delete::<DayOutcomes>(&day.date.to_string())? {
                    removed += 1;
                }
            }
            Ok(removed)
        })?;
        info!(removed, "Cleared stats history");
        Ok(removed)
    }

    // ========================================================================
    // Sync
    // ========================================================================

    /// Rebuild every collection whose log changed outside this store
    pub fn refresh(&mut self) -> Result<usize> {
        let mut rebuilt = 0;
        rebuilt += usize::from(self.store.refresh::<Config>()?);
        rebuilt += usize::from(self.store.refresh::<RunState>()?);
        rebuilt += usize::from(self.store.refresh::<DayCount>()?);
        rebuilt += usize::from(self.store.refresh::<DayOutcomes>()?);
        Ok(rebuilt)
    }

    /// Force a rebuild of every collection from its log. Returns live records loaded.
    pub fn resync(&mut self) -> Result<usize> {
        let mut loaded = 0;
        loaded += self.store.sync_collection::<Config>()?;
        loaded += self.store.sync_collection::<RunState>()?;
        loaded += self.store.sync_collection::<DayCount>()?;
        loaded += self.store.sync_collection::<DayOutcomes>()?;
        info!(loaded, "Resynced state from JSONL");
        Ok(loaded)
    }
}

/// Settings as seen inside a transaction of either scope
pub fn load_config(txn: &Txn<'_>) -> Result<Config> {
    Ok(txn.get::<Config>(CONFIG_ID)?.unwrap_or_default())
}

/// Timer state as seen inside a transaction, defaulting like [`StateService::run_state`]
pub fn load_run_state(txn: &Txn<'_>) -> Result<RunState> {
    match txn.get::<RunState>(RUN_STATE_ID)? {
        Some(state) => Ok(state),
        None => Ok(RunState::initial(&load_config(txn)?)),
    }
}

/// Add sessions to a day's count inside a local-scope transaction
pub fn credit_day(txn: &mut Txn<'_>, date: DateKey, sessions: u32) -> Result<u32> {
    let mut day = txn
        .get::<DayCount>(&date.to_string())?
        .unwrap_or_else(|| DayCount::empty(date));
    day.count = day.count.saturating_add(sessions);
    txn.put(&day)?;
    debug!(%date, count = day.count, "Credited sessions");
    Ok(day.count)
}


#[cfg(test)]
mod tests {
    use super::testing::{block_log, unblock_log};
    use super::*;
    use crate::error::ConfigError;
    use crate::models::Phase;
    use std::sync::{Arc, Barrier};
    use std::thread;
    use tempfile::TempDir;

    fn key(s: &str) -> DateKey {
        s.parse().unwrap()
    }

    #[test]
    fn test_open_installs_defaults_once() {
        let temp = TempDir::new().unwrap();
        let mut state = StateService::open(temp.path()).unwrap();

        assert_eq!(state.config().unwrap(), Config::default());
        assert_eq!(state.run_state().unwrap(), RunState::default());
        assert!(temp.path().join("sync/config.jsonl").exists());
        assert!(temp.path().join("local/run_state.jsonl").exists());

        assert!(!state.install_defaults().unwrap());
    }

    #[test]
    fn test_defaults_do_not_overwrite_existing_settings() {
        let temp = TempDir::new().unwrap();
        {
            let mut state = StateService::open(temp.path()).unwrap();
            state
                .save_config(&Config {
                    work_minutes: 50,
                    ..Config::default()
                })
                .unwrap();
        }

        let state = StateService::open(temp.path()).unwrap();
        assert_eq!(state.config().unwrap().work_minutes, 50);
    }

    #[test]
    fn test_invalid_config_is_not_written() {
        let temp = TempDir::new().unwrap();
        let mut state = StateService::open(temp.path()).unwrap();

        let err = state
            .save_config(&Config {
                work_minutes: 0,
                ..Config::default()
            })
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::NonPositive {
                field: "work_minutes",
                ..
            })
        ));
        assert_eq!(state.config().unwrap().work_minutes, 25);
    }

    #[test]
    fn test_update_run_state_rejected_by_closure_writes_nothing() {
        let temp = TempDir::new().unwrap();
        let mut state = StateService::open(temp.path()).unwrap();

        let result = state.update_run_state(|_| Err(eyre::eyre!("not now")));
        assert!(result.is_err());
        assert_eq!(state.run_state().unwrap(), RunState::default());
    }

    #[test]
    fn test_update_run_state_write_failure_keeps_previous_state() {
        let temp = TempDir::new().unwrap();
        let mut state = StateService::open(temp.path()).unwrap();

        block_log(temp.path(), "run_state");
        let result = state.update_run_state(|run| {
            Ok(RunState {
                phase: Phase::Break,
                ..run
            })
        });
        unblock_log(temp.path(), "run_state");

        assert!(result.is_err());
        assert_eq!(state.run_state().unwrap().phase, Phase::Work);
        state.refresh().unwrap();
        assert_eq!(state.run_state().unwrap().phase, Phase::Work);
    }

    #[test]
    fn test_credit_sessions_accumulates_per_day() {
        let temp = TempDir::new().unwrap();
        let mut state = StateService::open(temp.path()).unwrap();

        assert_eq!(state.credit_sessions(key("2026-01-12"), 1).unwrap(), 1);
        assert_eq!(state.credit_sessions(key("2026-01-12"), 1).unwrap(), 2);
        state.credit_sessions(key("2026-01-13"), 1).unwrap();

        let stats = state.stats_history().unwrap();
        assert_eq!(stats.daily_total(key("2026-01-12")), 2);
        assert_eq!(stats.daily_total(key("2026-01-13")), 1);
        assert_eq!(stats.daily_total(key("2026-01-14")), 0);
    }

    #[test]
    fn test_outcomes_do_not_change_counts() {
        let temp = TempDir::new().unwrap();
        let mut state = StateService::open(temp.path()).unwrap();
        let today = key("2026-01-12");

        state.record_outcome(today, OutcomeTag::Productive).unwrap();
        let day = state.record_outcome(today, OutcomeTag::Interrupted).unwrap();
        assert_eq!(day.tags, vec![OutcomeTag::Productive, OutcomeTag::Interrupted]);

        let stats = state.stats_history().unwrap();
        assert_eq!(stats.daily_total(today), 0);
        assert_eq!(stats.outcome_tally(today).productive, 1);
    }

    #[test]
    fn test_concurrent_outcome_marks_are_not_lost() {
        let temp = TempDir::new().unwrap();
        StateService::open(temp.path()).unwrap();
        let num_threads = 4;
        let barrier = Arc::new(Barrier::new(num_threads));

        let handles: Vec<_> = (0..num_threads)
            .map(|_| {
                let path = temp.path().to_path_buf();
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    let mut state = StateService::open(&path).unwrap();
                    barrier.wait();
                    for _ in 0..5 {
                        state.record_outcome(key("2026-01-12"), OutcomeTag::Productive).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let state = StateService::open(temp.path()).unwrap();
        let tally = state.stats_history().unwrap().outcome_tally(key("2026-01-12"));
        assert_eq!(tally.productive, 20);
    }

    #[test]
    fn test_stats_for_year_filters_by_index() {
        let temp = TempDir::new().unwrap();
        let mut state = StateService::open(temp.path()).unwrap();

        state.credit_sessions(key("2025-12-31"), 3).unwrap();
        state.credit_sessions(key("2026-01-01"), 2).unwrap();
        state.record_outcome(key("2025-12-31"), OutcomeTag::Interrupted).unwrap();

        let year = state.stats_for_year(2026).unwrap();
        assert_eq!(year.total(), 2);
        assert!(year.outcomes.is_empty());
    }

    #[test]
    fn test_clear_stats_history_removes_both_logs() {
        let temp = TempDir::new().unwrap();
        let mut state = StateService::open(temp.path()).unwrap();

        state.credit_sessions(key("2026-01-12"), 4).unwrap();
        state.credit_sessions(key("2026-01-13"), 1).unwrap();
        state.record_outcome(key("2026-01-12"), OutcomeTag::Productive).unwrap();

        assert_eq!(state.clear_stats_history().unwrap(), 3);
        assert!(state.stats_history().unwrap().is_empty());

        // The clear survives a rebuild from the logs
        state.resync().unwrap();
        assert!(state.stats_history().unwrap().is_empty());
        assert_eq!(state.config().unwrap(), Config::default());
    }
}
