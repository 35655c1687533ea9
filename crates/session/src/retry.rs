use derive_more::Display;
use std::time::Duration;
use tome_config::SessionConfig;

/// How [`Pool::run`](crate::Pool::run) treats a failed task.
///
/// Only retryable errors are retried; every policy stops at once when the
/// pool is cancelled.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum RetryPolicy {
    /// Retry until the task succeeds.
    #[display("unbounded")]
    Unbounded,
    /// Retry up to `n` more times, then return the last task error.
    #[display("bounded({_0})")]
    Bounded(u32),
    /// Retry until the deadline passes, then fail with a timeout.
    #[display("deadline({_0:?})")]
    Deadline(Duration),
    /// Like [`Bounded`](Self::Bounded), but keep the session and relaunch
    /// its automation before every retry.
    #[display("bounded_with_recovery({_0})")]
    BoundedWithRecovery(u32),
}

impl RetryPolicy {
    pub fn bounded(config: &SessionConfig) -> Self {
        Self::Bounded(config.retries)
    }

    pub fn recovering(config: &SessionConfig) -> Self {
        Self::BoundedWithRecovery(config.retries)
    }

    pub fn deadline(config: &SessionConfig) -> Self {
        Self::Deadline(config.timeout())
    }

    /// Additional attempts allowed, `None` when unlimited.
    pub(crate) fn retries(self) -> Option<u32> {
        match self {
            Self::Bounded(n) | Self::BoundedWithRecovery(n) => Some(n),
            Self::Unbounded | Self::Deadline(_) => None,
        }
    }

    pub(crate) fn time_limit(self) -> Option<Duration> {
        match self {
            Self::Deadline(limit) => Some(limit),
            _ => None,
        }
    }

    pub(crate) fn recovers(self) -> bool {
        matches!(self, Self::BoundedWithRecovery(_))
    }
}
