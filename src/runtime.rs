// Background loop that delivers due alarms

use crate::clock::DurableClock;
use crate::controller::{POMODORO_ALARM, TimerController};
use crate::engine;
use crate::goals::{self, GOAL_ALARM, GOAL_PERIOD_MINUTES, GoalShortfall};
use crate::models::{DateKey, now_ms};
use crate::signals::Notifier;
use eyre::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// The one place alarms are delivered
///
/// Commands only write state and arm alarms. This loop finds due alarms, hands
/// them to their handler and acknowledges them once the handler has committed.
pub struct Background<C, N> {
    timer: TimerController<C, N>,
}

impl<C: DurableClock, N: Notifier> Background<C, N> {
    pub fn new(timer: TimerController<C, N>) -> Self {
        Self { timer }
    }

    pub fn timer(&self) -> &TimerController<C, N> {
        &self.timer
    }

    pub fn timer_mut(&mut self) -> &mut TimerController<C, N> {
        &mut self.timer
    }

    /// Install defaults, make sure the goal check is scheduled and repair the
    /// pomodoro alarm if a running timer lost it
    pub fn startup(&mut self, now: i64) -> Result<()> {
        self.timer.state_mut().install_defaults()?;

        if self.timer.clock().pending(GOAL_ALARM)?.is_none() {
            let alarm = self.timer.clock_mut().arm_periodic(GOAL_ALARM, GOAL_PERIOD_MINUTES, now)?;
            info!(fire_at = alarm.fire_at, "Scheduled hourly goal check");
        }

        self.reconcile()?;
        Ok(())
    }

    /// Re-arm the pomodoro alarm at the exact end of a running phase that has
    /// none. Returns true if it had to.
    pub fn reconcile(&mut self) -> Result<bool> {
        let state = self.timer.state().run_state()?;
        let Some(fire_at) = engine::fire_time(&state) else {
            return Ok(false);
        };
        if self.timer.clock().pending(POMODORO_ALARM)?.is_some() {
            return Ok(false);
        }

        warn!(fire_at, phase = %state.phase, "Running timer had no alarm, re-arming");
        self.timer.clock_mut().arm_at(POMODORO_ALARM, fire_at)?;
        Ok(true)
    }

    /// Deliver every due alarm. Returns how many were handled.
    ///
    /// An alarm whose handler fails stays pending and is delivered again on
    /// the next tick.
    pub fn tick(&mut self, now: i64) -> Result<usize> {
        self.timer.state_mut().refresh()?;
        self.reconcile()?;

        let due = self.timer.clock().due(now)?;
        let mut handled = 0;
        for alarm in due {
            debug!(name = %alarm.name, fire_at = alarm.fire_at, "Delivering alarm");
            match alarm.name.as_str() {
                POMODORO_ALARM => {
                    self.timer.on_phase_elapsed(now)?;
                }
                GOAL_ALARM => {
                    self.check_goals(now)?;
                }
                other => warn!(name = other, "Unknown alarm, retiring it"),
            }
            self.timer.clock_mut().acknowledge(&alarm, now)?;
            handled += 1;
        }
        Ok(handled)
    }

    /// Notify about every goal still under target at `now`
    pub fn check_goals(&self, now: i64) -> Result<Vec<GoalShortfall>> {
        let state = self.timer.state();
        let history = state.stats_history()?;
        let config = state.config()?;
        Ok(goals::check(&history, &config, DateKey::from_millis(now), self.timer.notifier()))
    }

    /// Tick at the poll interval until `shutdown` is set
    pub fn run(&mut self, poll: Duration, shutdown: &AtomicBool) -> Result<()> {
        self.startup(now_ms())?;
        info!(poll_ms = poll.as_millis() as u64, "Background loop started");

        while !shutdown.load(Ordering::Relaxed) {
            if let Err(e) = self.tick(now_ms()) {
                warn!(error = ?e, "Tick failed, retrying on next poll");
            }
            thread::sleep(poll);
        }

        info!("Background loop stopped");
        Ok(())
    }
}
