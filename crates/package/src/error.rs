//! Packaging Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};

/// A packaging error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for packaging operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The record has no catalog to package from.
    #[display("record has no catalog")]
    NoCatalog,
    /// The record does not match the catalog it is packaged against.
    #[display("record and catalog disagree")]
    Record,
    /// Content references a resource the cache no longer holds.
    #[display("missing resource: {_0}")]
    MissingResource(#[error(not(source))] String),
    /// The artifact builder rejected the manuscript.
    #[display("artifact builder failed: {_0}")]
    Build(#[error(not(source))] String),
    #[display("artifact storage failed")]
    Storage,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage)
    }
}
