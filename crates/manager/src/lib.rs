//! Deck handle lifecycle coordination.
//!
//! One process, many subsystems, a shared set of file-backed decks: this
//! crate keeps them from stepping on each other. The hard part is not the
//! deck format (that lives behind `deckhand-store`) but the lifecycle
//! races: two screens requesting the same deck at once, an acquire racing
//! a half-finished background close, a forced reopen while the sync
//! client holds the file, a teardown that must wait for a long-running
//! operation elsewhere.
//!
//! # Architecture
//! - A lazily-populated table of per-key locks serializes all open/close
//!   bookkeeping for a deck.
//! - The registry maps each key to its handle record: the open resource,
//!   the set of requesters holding it, and the in-flight close task if
//!   teardown is underway. A record exists exactly as long as it has
//!   openers or a running closer.
//! - Closes run on background tasks that can be cancelled (reviving the
//!   handle) or joined, with cancellation checked only at safe
//!   boundaries.
//! - At most one deck is designated "main" for callers that don't name
//!   one; the designation is a single slot, not a reference count.
//!
//! Everything else — backups, widget notifications, the gate on
//! long-running deck operations — enters through the narrow traits in
//! [`hooks`](crate::hooks).

mod closer;
pub mod error;
pub mod hooks;
mod locks;
mod manager;
mod registry;
mod requester;

pub use crate::closer::{CloseState, CloseTask};
pub use crate::hooks::{BackupHook, BackupPolicy, NoBackup, NoTaskGate, NoWidget, TaskGate, WidgetHook};
pub use crate::manager::{AcquireOptions, DeckManager, DeckManagerBuilder, ReleaseOutcome};
pub use crate::requester::Requester;
pub use deckhand_store::{Deck, DeckKey, DeckStore};
