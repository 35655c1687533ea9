//! Limiter Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};

/// A limiter error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for limiter operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// Every slot in the category is held (fail-fast acquisition).
    #[display("no free slot for `{_0}`")]
    Busy(#[error(not(source))] String),
    #[display("timed out waiting for a slot for `{_0}`")]
    Timeout(#[error(not(source))] String),
    #[display("cancelled while waiting for a slot for `{_0}`")]
    Cancelled(#[error(not(source))] String),
    #[display("limiter for `{_0}` has been closed")]
    Closed(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Busy(_) | Self::Timeout(_))
    }
}
