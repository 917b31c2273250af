// Phase engine: pure timer arithmetic, no store or clock access

use crate::models::{Config, Phase, RunState};
use serde::Serialize;

const MS_PER_MINUTE: i64 = 60_000;

/// Result of a phase running out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseAdvance {
    pub next_phase: Phase,
    pub next_duration_minutes: u32,
    pub completed_cycles: u32,
    /// Completed work sessions to credit to today's date key (0 or 1)
    pub stat_increment: u32,
}

impl PhaseAdvance {
    /// The stopped state the timer rests in until the next phase is started
    pub fn into_run_state(self) -> RunState {
        RunState {
            phase: self.next_phase,
            duration_minutes: self.next_duration_minutes,
            start_time: None,
            completed_cycles: self.completed_cycles,
        }
    }
}

/// Compute what follows the phase described by `state`.
///
/// A finished work phase counts one cycle and is followed by a long break on
/// every `cycles`-th cycle, a short break otherwise. A finished break is
/// followed by a full work phase. The next phase never starts on its own.
pub fn advance_phase(state: &RunState, config: &Config) -> PhaseAdvance {
    match state.phase {
        Phase::Work => {
            let completed_cycles = state.completed_cycles + 1;
            let next_duration_minutes = if completed_cycles % config.cycles.max(1) == 0 {
                config.long_break_minutes
            } else {
                config.short_break_minutes
            };
            PhaseAdvance {
                next_phase: Phase::Break,
                next_duration_minutes,
                completed_cycles,
                stat_increment: 1,
            }
        }
        Phase::Break => PhaseAdvance {
            next_phase: Phase::Work,
            next_duration_minutes: config.work_minutes,
            completed_cycles: state.completed_cycles,
            stat_increment: 0,
        },
    }
}

/// Milliseconds left in the current phase at `now`, never negative.
///
/// A stopped timer has its whole stored duration left.
pub fn remaining_ms(state: &RunState, now: i64) -> i64 {
    let total = state.duration_ms();
    match state.start_time {
        Some(start) => (total - now.saturating_sub(start)).clamp(0, total),
        None => total,
    }
}

/// Whole minutes covering `ms`, so any partial minute counts as one
pub fn minutes_rounded_up(ms: i64) -> u32 {
    if ms <= 0 {
        return 0;
    }
    let minutes = (ms + MS_PER_MINUTE - 1) / MS_PER_MINUTE;
    u32::try_from(minutes).unwrap_or(u32::MAX)
}

/// Epoch milliseconds at which a running phase ends
pub fn fire_time(state: &RunState) -> Option<i64> {
    state.start_time.map(|start| start + state.duration_ms())
}

/// What a UI surface shows when it polls the timer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Snapshot {
    pub is_running: bool,
    pub is_work_phase: bool,
    pub duration_minutes: u32,
    pub start_time: Option<i64>,
    pub completed_cycles: u32,
    pub remaining_ms: i64,
}

impl Snapshot {
    pub fn capture(state: &RunState, now: i64) -> Self {
        Self {
            is_running: state.is_running(),
            is_work_phase: state.is_work_phase(),
            duration_minutes: state.duration_minutes,
            start_time: state.start_time,
            completed_cycles: state.completed_cycles,
            remaining_ms: remaining_ms(state, now),
        }
    }

    /// Remaining time as `MM:SS`, seconds truncated
    pub fn countdown(&self) -> String {
        let total_secs = self.remaining_ms / 1000;
        format!("{:02}:{:02}", total_secs / 60, total_secs % 60)
    }
}
