// Pomotrack - Pomodoro focus timer with durable state, goals and session stats

pub mod clock;
pub mod controller;
pub mod engine;
pub mod error;
pub mod filter;
pub mod goals;
pub mod jsonl;
pub mod models;
pub mod record;
pub mod runtime;
pub mod signals;
pub mod state;
pub mod stats;
pub mod store;

// Re-export main types for convenience
pub use clock::{Alarm, DurableClock, StoreClock};
pub use controller::{POMODORO_ALARM, PauseOutcome, PhaseOutcome, TimerController, Transition};
pub use engine::{PhaseAdvance, Snapshot, advance_phase, remaining_ms};
pub use error::{ConfigError, DateKeyError, OutcomeError, TimerError};
pub use filter::{Filter, FilterOp};
pub use goals::{GOAL_ALARM, Goal, GoalShortfall};
pub use models::{Config, DateKey, DayCount, DayOutcomes, OutcomeTag, Phase, RunState, now_ms};
pub use record::{IndexValue, Record, Scope};
pub use runtime::Background;
pub use signals::{Notifier, SignalBus, TracingNotifier, UiSignal};
pub use state::StateService;
pub use stats::{OutcomeTally, StatsHistory};
pub use store::{Store, Txn};
