// Hourly goal check

use crate::models::{Config, DateKey};
use crate::signals::Notifier;
use crate::stats::StatsHistory;
use tracing::debug;

/// Periodic alarm that drives the goal check
pub const GOAL_ALARM: &str = "checkGoals";

pub const GOAL_PERIOD_MINUTES: u32 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Goal {
    Daily,
    Weekly,
}

/// A goal that is still under target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GoalShortfall {
    pub goal: Goal,
    pub done: u32,
    pub target: u32,
}

impl GoalShortfall {
    pub fn title(&self) -> &'static str {
        match self.goal {
            Goal::Daily => "Daily goal not met",
            Goal::Weekly => "Weekly goal not met",
        }
    }

    pub fn message(&self) -> String {
        match self.goal {
            Goal::Daily => format!("Today: {}/{} cycles.", self.done, self.target),
            Goal::Weekly => format!("This week: {}/{} cycles.", self.done, self.target),
        }
    }
}

/// Compare today's and this week's totals against the configured goals.
///
/// The week runs Sunday through Saturday in local time.
pub fn evaluate(history: &StatsHistory, config: &Config, today: DateKey) -> Vec<GoalShortfall> {
    let daily = history.daily_total(today);
    let weekly = history.weekly_total(StatsHistory::week_start(today));

    let mut shortfalls = Vec::new();
    if daily < config.daily_goal {
        shortfalls.push(GoalShortfall {
            goal: Goal::Daily,
            done: daily,
            target: config.daily_goal,
        });
    }
    if weekly < config.weekly_goal {
        shortfalls.push(GoalShortfall {
            goal: Goal::Weekly,
            done: weekly,
            target: config.weekly_goal,
        });
    }
    shortfalls
}

/// Notify once per unmet goal. Every call notifies again while a goal is unmet.
pub fn check<N: Notifier>(history: &StatsHistory, config: &Config, today: DateKey, notifier: &N) -> Vec<GoalShortfall> {
    let shortfalls = evaluate(history, config, today);
    for shortfall in &shortfalls {
        notifier.notify(shortfall.title(), &shortfall.message());
    }
    debug!(%today, unmet = shortfalls.len(), "Checked goals");
    shortfalls
}
