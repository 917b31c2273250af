// Domain error kinds, carried inside eyre reports and recovered with downcast_ref

use thiserror::Error;

/// A settings record that must not be written.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{field} must be greater than zero (got {value})")]
    NonPositive { field: &'static str, value: u32 },
}

/// A timer command whose precondition does not hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TimerError {
    #[error("timer is already running")]
    AlreadyRunning,

    #[error("timer is not running")]
    NotRunning,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid date key '{0}' (expected YYYY-MM-DD)")]
pub struct DateKeyError(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown session outcome '{0}' (expected 'productive' or 'interrupted')")]
pub struct OutcomeError(pub String);
