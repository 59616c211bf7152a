//! Store Error Types
//!
//! Structured errors using `exn` for automatic location tracking and error
//! tree construction.

use derive_more::{Display, Error};
use std::path::PathBuf;

/// A store error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong
/// internally. An [`Open`](ErrorKind::Open) failure is always recoverable:
/// callers are expected to fall back (restore a backup, report "no deck"),
/// never to abort the process.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The deck file could not be opened.
    #[display("deck could not be opened: {}", _0.display())]
    Open(#[error(not(source))] PathBuf),
    /// A query against an open deck failed.
    #[display("deck database error")]
    Database,
    /// Operation attempted against a deck that has already been closed.
    #[display("deck already closed: {}", _0.display())]
    Closed(#[error(not(source))] PathBuf),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Database)
    }
}
