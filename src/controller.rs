// Timer controller: commands in, committed state and armed alarms out

use crate::clock::DurableClock;
use crate::engine::{self, PhaseAdvance, Snapshot};
use crate::error::TimerError;
use crate::models::{Config, DateKey, Phase, RunState};
use crate::signals::{Notifier, SignalBus, UiSignal};
use crate::state::{self, StateService};
use crate::store::Txn;
use eyre::Result;
use tracing::{debug, info};

/// Alarm that ends the running phase
pub const POMODORO_ALARM: &str = "pomodoro";

/// How much of a phase may still be left when its alarm is accepted as the end
const ELAPSE_TOLERANCE_MS: i64 = 5_000;

/// A committed phase change
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub finished: Phase,
    pub next: RunState,
    /// Day credited with a completed work session, if one was completed
    pub credited: Option<DateKey>,
}

/// What a phase-elapsed delivery did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhaseOutcome {
    /// Timer was not running: a duplicate or leftover delivery, ignored
    Stale,
    /// Alarm came in while the phase still had time left, ignored
    Early { remaining_ms: i64 },
    Advanced(Transition),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PauseOutcome {
    Paused(RunState),
    /// Nothing was left of the phase, so pausing finished it
    Completed(Transition),
}

impl PauseOutcome {
    pub fn run_state(&self) -> &RunState {
        match self {
            PauseOutcome::Paused(state) => state,
            PauseOutcome::Completed(transition) => &transition.next,
        }
    }
}

/// Start, pause, reset and phase completion over the stored timer state
///
/// Every command cancels the old alarm, writes the timer state, then arms the
/// new alarm. A running timer left without an alarm is re-armed by
/// [`crate::runtime::Background::reconcile`]. A stale alarm is absorbed by
/// [`TimerController::on_phase_elapsed`], which re-checks the stored state.
pub struct TimerController<C, N> {
    state: StateService,
    clock: C,
    notifier: N,
    signals: SignalBus,
}

impl<C: DurableClock, N: Notifier> TimerController<C, N> {
    pub fn new(state: StateService, clock: C, notifier: N, signals: SignalBus) -> Self {
        Self {
            state,
            clock,
            notifier,
            signals,
        }
    }

    pub fn state(&self) -> &StateService {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut StateService {
        &mut self.state
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn clock_mut(&mut self) -> &mut C {
        &mut self.clock
    }

    pub fn notifier(&self) -> &N {
        &self.notifier
    }

    pub fn signals(&self) -> &SignalBus {
        &self.signals
    }

    pub fn snapshot(&self, now: i64) -> Result<Snapshot> {
        Ok(Snapshot::capture(&self.state.run_state()?, now))
    }

    /// Start the stored phase with its stored duration
    pub fn start(&mut self, now: i64) -> Result<RunState> {
        if self.state.run_state()?.is_running() {
            return Err(TimerError::AlreadyRunning.into());
        }

        self.clock.cancel(POMODORO_ALARM)?;
        let started = self.state.update_run_state(|current| {
            if current.is_running() {
                return Err(TimerError::AlreadyRunning.into());
            }
            Ok(RunState {
                start_time: Some(now),
                ..current
            })
        })?;
        self.clock.arm(POMODORO_ALARM, started.duration_minutes, now)?;

        info!(phase = %started.phase, minutes = started.duration_minutes, "Timer started");
        Ok(started)
    }

    /// Stop the clock and keep the rounded-up remainder as the phase duration
    pub fn pause(&mut self, now: i64) -> Result<PauseOutcome> {
        if !self.state.run_state()?.is_running() {
            return Err(TimerError::NotRunning.into());
        }

        self.clock.cancel(POMODORO_ALARM)?;
        let outcome = self.state.transaction(|txn| {
            let current = state::load_run_state(txn)?;
            if !current.is_running() {
                return Err(TimerError::NotRunning.into());
            }

            let remaining = engine::remaining_ms(&current, now);
            if remaining == 0 {
                let config = state::load_config(txn)?;
                return complete_phase(txn, &current, &config, now).map(PauseOutcome::Completed);
            }

            let paused = RunState {
                duration_minutes: engine::minutes_rounded_up(remaining),
                start_time: None,
                ..current
            };
            txn.put(&paused)?;
            Ok(PauseOutcome::Paused(paused))
        })?;

        match &outcome {
            PauseOutcome::Paused(paused) => {
                info!(phase = %paused.phase, minutes = paused.duration_minutes, "Timer paused");
            }
            PauseOutcome::Completed(transition) => {
                info!(finished = %transition.finished, "Pause arrived after the phase ended, completing it");
                self.announce(transition)?;
            }
        }
        Ok(outcome)
    }

    /// Back to a stopped, full-length work phase with no completed cycles.
    /// History is left alone.
    pub fn reset(&mut self) -> Result<RunState> {
        self.clock.cancel(POMODORO_ALARM)?;
        let reset = self.state.transaction(|txn| {
            let initial = RunState::initial(&state::load_config(txn)?);
            txn.put(&initial)?;
            Ok(initial)
        })?;

        info!(minutes = reset.duration_minutes, "Timer reset");
        Ok(reset)
    }

    /// Handle a delivery of the pomodoro alarm. Safe to call any number of times.
    pub fn on_phase_elapsed(&mut self, now: i64) -> Result<PhaseOutcome> {
        let outcome = self.state.transaction(|txn| {
            let current = state::load_run_state(txn)?;
            if !current.is_running() {
                return Ok(PhaseOutcome::Stale);
            }

            let remaining = engine::remaining_ms(&current, now);
            if remaining > ELAPSE_TOLERANCE_MS {
                return Ok(PhaseOutcome::Early { remaining_ms: remaining });
            }

            let config = state::load_config(txn)?;
            complete_phase(txn, &current, &config, now).map(PhaseOutcome::Advanced)
        })?;

        match &outcome {
            PhaseOutcome::Stale => debug!("Phase alarm arrived while stopped, ignoring"),
            PhaseOutcome::Early { remaining_ms } => {
                debug!(remaining_ms, "Phase alarm arrived early, ignoring")
            }
            PhaseOutcome::Advanced(transition) => self.announce(transition)?,
        }
        Ok(outcome)
    }

    fn announce(&self, transition: &Transition) -> Result<()> {
        let (title, message) = match transition.finished {
            Phase::Work => ("Work session complete", "Time for a break."),
            Phase::Break => ("Break over", "Back to focus."),
        };
        self.notifier.notify(title, message);

        self.signals.emit(UiSignal::PhaseChanged {
            phase: transition.next.phase,
            duration_minutes: transition.next.duration_minutes,
        });
        if self.state.config()?.sound_enabled {
            self.signals.emit(UiSignal::PlaySound);
        }
        Ok(())
    }
}

/// Commit the phase after `current` and credit today's date key in one transaction
fn complete_phase(txn: &mut Txn<'_>, current: &RunState, config: &Config, now: i64) -> Result<Transition> {
    let advance: PhaseAdvance = engine::advance_phase(current, config);
    let next = advance.into_run_state();
    txn.put(&next)?;

    let credited = if advance.stat_increment > 0 {
        let date = DateKey::from_millis(now);
        state::credit_day(txn, date, advance.stat_increment)?;
        Some(date)
    } else {
        None
    };

    info!(
        finished = %current.phase,
        next = %next.phase,
        minutes = next.duration_minutes,
        cycles = next.completed_cycles,
        "Phase complete"
    );
    Ok(Transition {
        finished: current.phase,
        next,
        credited,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::StoreClock;
    use crate::signals::testing::RecordingNotifier;
    use chrono::{Local, TimeZone};
    use proptest::prelude::*;
    use tempfile::TempDir;

    const MINUTE: i64 = 60_000;

    type TestController = TimerController<StoreClock, RecordingNotifier>;

    fn controller(temp: &TempDir) -> TestController {
        TimerController::new(
            StateService::open(temp.path()).unwrap(),
            StoreClock::open(temp.path()).unwrap(),
            RecordingNotifier::default(),
            SignalBus::new(),
        )
    }

    fn monday_morning() -> i64 {
        Local.with_ymd_and_hms(2026, 1, 12, 9, 0, 0).unwrap().timestamp_millis()
    }

    fn pending_fire(timer: &TestController) -> Option<i64> {
        timer.clock().pending(POMODORO_ALARM).unwrap().map(|alarm| alarm.fire_at)
    }

    #[test]
    fn test_start_arms_alarm_for_stored_duration() {
        let temp = TempDir::new().unwrap();
        let mut timer = controller(&temp);

        let started = timer.start(0).unwrap();
        assert!(started.is_running());
        assert_eq!(started.start_time, Some(0));
        assert_eq!(pending_fire(&timer), Some(25 * MINUTE));
    }

    #[test]
    fn test_start_while_running_is_rejected() {
        let temp = TempDir::new().unwrap();
        let mut timer = controller(&temp);

        timer.start(0).unwrap();
        let err = timer.start(1_000).unwrap_err();
        assert_eq!(err.downcast_ref::<TimerError>(), Some(&TimerError::AlreadyRunning));

        assert_eq!(timer.state().run_state().unwrap().start_time, Some(0));
        assert_eq!(pending_fire(&timer), Some(25 * MINUTE));
    }

    #[test]
    fn test_pause_keeps_exact_remainder_and_resume_uses_it() {
        let temp = TempDir::new().unwrap();
        let mut timer = controller(&temp);

        timer.start(0).unwrap();
        let paused = timer.pause(600_000).unwrap();
        assert_eq!(paused.run_state().duration_minutes, 15);
        assert!(!paused.run_state().is_running());
        assert_eq!(pending_fire(&timer), None);

        timer.start(1_000_000).unwrap();
        assert_eq!(pending_fire(&timer), Some(1_000_000 + 15 * MINUTE));
    }

    #[test]
    fn test_pause_rounds_partial_minute_up() {
        let temp = TempDir::new().unwrap();
        let mut timer = controller(&temp);

        timer.start(0).unwrap();
        // 24.2 minutes in, 0.8 minutes left
        let paused = timer.pause(1_452_000).unwrap();
        assert_eq!(paused, PauseOutcome::Paused(timer.state().run_state().unwrap()));
        assert_eq!(paused.run_state().duration_minutes, 1);
    }

    #[test]
    fn test_pause_while_stopped_is_rejected() {
        let temp = TempDir::new().unwrap();
        let mut timer = controller(&temp);

        let err = timer.pause(0).unwrap_err();
        assert_eq!(err.downcast_ref::<TimerError>(), Some(&TimerError::NotRunning));
        assert_eq!(timer.state().run_state().unwrap(), RunState::default());
    }

    #[test]
    fn test_pause_after_phase_ran_out_completes_it() {
        let temp = TempDir::new().unwrap();
        let mut timer = controller(&temp);
        let start = monday_morning();

        timer.start(start).unwrap();
        let outcome = timer.pause(start + 26 * MINUTE).unwrap();

        let PauseOutcome::Completed(transition) = outcome else {
            panic!("expected the overdue phase to complete");
        };
        assert_eq!(transition.finished, Phase::Work);
        assert_eq!(transition.next.phase, Phase::Break);
        assert_eq!(transition.next.duration_minutes, 5);

        let stats = timer.state().stats_history().unwrap();
        assert_eq!(stats.daily_total(DateKey::from_millis(start)), 1);
    }

    #[test]
    fn test_duplicate_elapse_applies_once() {
        let temp = TempDir::new().unwrap();
        let mut timer = controller(&temp);
        let start = monday_morning();

        timer.start(start).unwrap();
        let end = start + 25 * MINUTE;
        assert!(matches!(timer.on_phase_elapsed(end).unwrap(), PhaseOutcome::Advanced(_)));
        assert_eq!(timer.on_phase_elapsed(end).unwrap(), PhaseOutcome::Stale);

        let state = timer.state().run_state().unwrap();
        assert_eq!(state.completed_cycles, 1);
        assert_eq!(state.phase, Phase::Break);
        let stats = timer.state().stats_history().unwrap();
        assert_eq!(stats.daily_total(DateKey::from_millis(start)), 1);
        assert_eq!(timer.notifier().sent.borrow().len(), 1);
    }

    #[test]
    fn test_early_alarm_changes_nothing() {
        let temp = TempDir::new().unwrap();
        let mut timer = controller(&temp);

        let started = timer.start(0).unwrap();
        let outcome = timer.on_phase_elapsed(10 * MINUTE).unwrap();
        assert_eq!(
            outcome,
            PhaseOutcome::Early {
                remaining_ms: 15 * MINUTE
            }
        );
        assert_eq!(timer.state().run_state().unwrap(), started);
        assert!(timer.notifier().sent.borrow().is_empty());
    }

    #[test]
    fn test_elapse_within_tolerance_advances() {
        let temp = TempDir::new().unwrap();
        let mut timer = controller(&temp);

        timer.start(0).unwrap();
        let outcome = timer.on_phase_elapsed(25 * MINUTE - 2_000).unwrap();
        assert!(matches!(outcome, PhaseOutcome::Advanced(_)));
    }

    #[test]
    fn test_reset_from_break_returns_to_fresh_work_phase() {
        let temp = TempDir::new().unwrap();
        let mut timer = controller(&temp);
        let start = monday_morning();

        timer.start(start).unwrap();
        timer.on_phase_elapsed(start + 25 * MINUTE).unwrap();
        timer.start(start + 26 * MINUTE).unwrap();

        let reset = timer.reset().unwrap();
        assert_eq!(reset.phase, Phase::Work);
        assert_eq!(reset.duration_minutes, 25);
        assert_eq!(reset.completed_cycles, 0);
        assert!(!reset.is_running());
        assert_eq!(pending_fire(&timer), None);

        // History is untouched
        let stats = timer.state().stats_history().unwrap();
        assert_eq!(stats.daily_total(DateKey::from_millis(start)), 1);
    }

    #[test]
    fn test_four_cycles_end_to_end() {
        let temp = TempDir::new().unwrap();
        let mut timer = controller(&temp);
        let mut rx = timer.signals().subscribe();
        let day = DateKey::from_millis(monday_morning());

        let mut now = monday_morning();
        let mut breaks = Vec::new();
        for _ in 0..4 {
            let work = timer.start(now).unwrap();
            assert_eq!(work.phase, Phase::Work);
            now += i64::from(work.duration_minutes) * MINUTE;
            let PhaseOutcome::Advanced(after_work) = timer.on_phase_elapsed(now).unwrap() else {
                panic!("work phase did not advance");
            };
            assert_eq!(after_work.credited, Some(day));
            breaks.push(after_work.next.duration_minutes);

            let rest = timer.start(now).unwrap();
            assert_eq!(rest.phase, Phase::Break);
            now += i64::from(rest.duration_minutes) * MINUTE;
            let PhaseOutcome::Advanced(after_break) = timer.on_phase_elapsed(now).unwrap() else {
                panic!("break did not advance");
            };
            assert_eq!(after_break.credited, None);
            assert_eq!(after_break.next.duration_minutes, 25);
        }

        assert_eq!(breaks, vec![5, 5, 5, 15]);
        let state = timer.state().run_state().unwrap();
        assert_eq!(state.completed_cycles, 4);
        assert_eq!(state.phase, Phase::Work);
        assert_eq!(timer.state().stats_history().unwrap().daily_total(day), 4);

        let sent = timer.notifier().sent.borrow();
        assert_eq!(sent.len(), 8);
        assert_eq!(sent[0].0, "Work session complete");
        assert_eq!(sent[1].0, "Break over");

        let mut sounds = 0;
        while let Ok(signal) = rx.try_recv() {
            if signal == UiSignal::PlaySound {
                sounds += 1;
            }
        }
        assert_eq!(sounds, 8);
    }

    #[test]
    fn test_sound_signal_respects_setting() {
        let temp = TempDir::new().unwrap();
        let mut timer = controller(&temp);
        timer
            .state_mut()
            .save_config(&Config {
                sound_enabled: false,
                ..Config::default()
            })
            .unwrap();
        let mut rx = timer.signals().subscribe();

        timer.start(0).unwrap();
        timer.on_phase_elapsed(25 * MINUTE).unwrap();

        assert_eq!(
            rx.try_recv().unwrap(),
            UiSignal::PhaseChanged {
                phase: Phase::Break,
                duration_minutes: 5
            }
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_new_settings_apply_from_next_phase() {
        let temp = TempDir::new().unwrap();
        let mut timer = controller(&temp);

        timer.start(0).unwrap();
        timer
            .state_mut()
            .save_config(&Config {
                short_break_minutes: 10,
                ..Config::default()
            })
            .unwrap();
        // The running phase keeps its length
        assert_eq!(pending_fire(&timer), Some(25 * MINUTE));

        let PhaseOutcome::Advanced(transition) = timer.on_phase_elapsed(25 * MINUTE).unwrap() else {
            panic!("work phase did not advance");
        };
        assert_eq!(transition.next.duration_minutes, 10);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Start,
        Pause,
        Reset,
        Elapse,
        Wait(i64),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            Just(Op::Start),
            Just(Op::Pause),
            Just(Op::Reset),
            Just(Op::Elapse),
            (0i64..30 * MINUTE).prop_map(Op::Wait),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(12))]

        #[test]
        fn prop_operations_keep_state_and_alarm_consistent(ops in prop::collection::vec(op_strategy(), 1..30)) {
            let temp = TempDir::new().unwrap();
            let mut timer = controller(&temp);
            let mut now = monday_morning();
            let mut work_completions = 0u32;

            for op in ops {
                match op {
                    Op::Start => { let _ = timer.start(now); }
                    Op::Pause => {
                        if let Ok(PauseOutcome::Completed(t)) = timer.pause(now) {
                            if t.finished == Phase::Work { work_completions += 1; }
                        }
                    }
                    Op::Reset => { timer.reset().unwrap(); }
                    Op::Elapse => {
                        if let PhaseOutcome::Advanced(t) = timer.on_phase_elapsed(now).unwrap() {
                            if t.finished == Phase::Work { work_completions += 1; }
                        }
                    }
                    Op::Wait(ms) => now += ms,
                }

                let state = timer.state().run_state().unwrap();
                prop_assert!(state.duration_minutes > 0);
                if state.is_running() {
                    prop_assert_eq!(pending_fire(&timer), engine::fire_time(&state));
                }
                prop_assert_eq!(timer.state().stats_history().unwrap().total(), work_completions);
            }
        }
    }
}
