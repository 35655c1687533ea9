//! Crawl Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};

/// A crawl error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for crawl operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("no source named `{_0}`")]
    UnknownSource(#[error(not(source))] String),
    #[display("a source named `{_0}` is already registered")]
    DuplicateSource(#[error(not(source))] String),
    /// A background crawl for the same item has not finished yet.
    #[display("already caching {_0}")]
    AlreadyCaching(#[error(not(source))] String),
    /// The saved record does not hold the content asked for.
    #[display("not loaded: {_0}")]
    NotLoaded(#[error(not(source))] String),
    #[display("cancelled")]
    Cancelled,
    /// Fetching through the session pool failed.
    #[display("remote session failed")]
    Session,
    /// Loading, reconciling or saving the record failed.
    #[display("record handling failed")]
    Record,
    #[display("packaging failed")]
    Package,
    #[display("no capacity available")]
    Limit,
    #[display("storage setup failed")]
    Storage,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Session | Self::Limit)
    }
}

/// Wrap a session error, keeping cancellation recognisable.
pub(crate) fn session_error(err: tome_session::error::Error) -> Error {
    let kind = match &*err {
        tome_session::error::ErrorKind::Cancelled | tome_session::error::ErrorKind::PoolClosed => ErrorKind::Cancelled,
        _ => ErrorKind::Session,
    };
    err.raise(kind)
}

/// Wrap a limiter error, keeping cancellation recognisable.
pub(crate) fn limit_error(err: tome_limit::error::Error) -> Error {
    let kind = match &*err {
        tome_limit::error::ErrorKind::Cancelled(_) => ErrorKind::Cancelled,
        _ => ErrorKind::Limit,
    };
    err.raise(kind)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tome_session::error::ErrorKind as SessionErrorKind;

    #[rstest]
    #[case(SessionErrorKind::Cancelled, "cancelled", false)]
    #[case(SessionErrorKind::PoolClosed, "cancelled", false)]
    #[case(SessionErrorKind::Navigation("gone".to_string()), "remote session failed", true)]
    #[case(SessionErrorKind::Fatal("logged out".to_string()), "remote session failed", true)]
    fn test_session_error(#[case] kind: SessionErrorKind, #[case] display: &str, #[case] retryable: bool) {
        let err = session_error(exn::Exn::from(kind));
        assert_eq!((*err).to_string(), display);
        assert_eq!(err.is_retryable(), retryable);
    }

    #[rstest]
    #[case(tome_limit::error::ErrorKind::Cancelled("cache".to_string()), false)]
    #[case(tome_limit::error::ErrorKind::Busy("cache".to_string()), true)]
    #[case(tome_limit::error::ErrorKind::Timeout("cache".to_string()), true)]
    fn test_limit_error(#[case] kind: tome_limit::error::ErrorKind, #[case] retryable: bool) {
        assert_eq!(limit_error(exn::Exn::from(kind)).is_retryable(), retryable);
    }
}
