//! Manager Error Types
//!
//! Structured errors using `exn` for automatic location tracking and error
//! tree construction.
//!
//! Only conditions that deny the caller a handle are errors. "Key was not
//! loaded" and "already closing" are ordinary outcomes of the release path
//! (see [`ReleaseOutcome`](crate::ReleaseOutcome)); nothing in this crate
//! terminates the process.

use deckhand_store::DeckKey;
use derive_more::{Display, Error};

/// A manager error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for manager operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong
/// internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The deck could not be opened, and the restore fallback has already
    /// been attempted. The caller gets no handle; it should tell the user
    /// rather than retry immediately.
    #[display("deck could not be opened: {_0}")]
    Open(#[error(not(source))] DeckKey),
    /// The sync client currently holds this deck exclusively. Distinct
    /// from an open failure: the deck is fine, the caller just has to
    /// come back after the sync. Do not retry in a tight loop.
    #[display("deck is held exclusively by the sync client: {_0}")]
    SyncExclusive(#[error(not(source))] DeckKey),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::SyncExclusive(_))
    }
}
