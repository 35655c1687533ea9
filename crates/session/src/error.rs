//! Session Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};

/// A session error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for session operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// Automation and source implementations report page-level trouble as
/// [`Navigation`](Self::Navigation) or [`Structure`](Self::Structure); the
/// pool retries those. Everything else is surfaced as-is.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The pool is shutting down or has shut down.
    #[display("session pool is closed")]
    PoolClosed,
    /// The pool's cancellation scope was signalled.
    #[display("cancelled")]
    Cancelled,
    /// A deadline-bounded operation ran out of time.
    #[display("timed out after {_0:?}")]
    Timeout(#[error(not(source))] std::time::Duration),
    /// The session was closed (released, or expired while idle).
    #[display("session {_0} is closed")]
    SessionClosed(#[error(not(source))] String),
    /// The automation surface could not be started.
    #[display("failed to launch automation: {_0}")]
    Launch(#[error(not(source))] String),
    /// Loading a page or fetching a resource failed.
    #[display("navigation failed: {_0}")]
    Navigation(#[error(not(source))] String),
    /// The page did not have the structure a source expected.
    #[display("unexpected page structure: {_0}")]
    Structure(#[error(not(source))] String),
    /// The automation surface failed in a way retrying won't fix
    /// (authentication, dead process).
    #[display("automation failure: {_0}")]
    Fatal(#[error(not(source))] String),
    /// Scratch directory handling failed.
    Io,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Navigation(_) | Self::Structure(_) | Self::SessionClosed(_) | Self::Timeout(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::time::Duration;

    #[rstest]
    #[case(ErrorKind::Navigation("404".into()), true)]
    #[case(ErrorKind::Structure("no title".into()), true)]
    #[case(ErrorKind::SessionClosed("s".into()), true)]
    #[case(ErrorKind::Timeout(Duration::from_secs(1)), true)]
    #[case(ErrorKind::Cancelled, false)]
    #[case(ErrorKind::PoolClosed, false)]
    #[case(ErrorKind::Launch("no binary".into()), false)]
    #[case(ErrorKind::Fatal("login required".into()), false)]
    fn test_retryable(#[case] kind: ErrorKind, #[case] retryable: bool) {
        assert_eq!(kind.is_retryable(), retryable);
    }
}
