//! File-backed deck resources.
//!
//! A "deck" is a single SQLite file opened on demand. This crate keeps the
//! resource surface deliberately narrow: [`DeckStore`] opens decks and
//! [`Deck`] exposes the few operations the lifecycle layer needs (close,
//! journal-mode query, card counts for status reporting). Everything else
//! about the file format stays behind these two traits.
//!
//! The production implementation is [`SqliteStore`] on `sqlx`. An in-memory
//! [`MockStore`] is available behind the `mock` feature for tests in
//! dependent crates.

mod deck;
pub mod error;
mod key;
#[cfg(feature = "mock")]
mod mock;
mod sqlite;

pub use crate::deck::{Deck, DeckStore};
pub use crate::key::DeckKey;
#[cfg(feature = "mock")]
pub use crate::mock::{MockDeck, MockStore};
pub use crate::sqlite::{SqliteDeck, SqliteStore};
