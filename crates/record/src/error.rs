//! Record Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use crate::tree::Position;
use derive_more::{Display, Error};

/// A record error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for record operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// A selection names a volume or chapter the catalog does not have.
    #[display("selection out of range: {_0}")]
    SelectionOutOfRange(#[error(not(source))] String),
    /// A position does not exist in the record tree.
    #[display("no record node at {_0}")]
    NoSuchNode(#[error(not(source))] Position),
    /// The persisted record could not be decoded.
    #[display("malformed record: {_0}")]
    Malformed(#[error(not(source))] String),
    #[display("could not encode record")]
    Encode,
    #[display("record storage failed")]
    Storage,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage)
    }
}
