//! The deck resource traits.

use crate::error::Result;
use crate::key::DeckKey;
use async_trait::async_trait;
use std::sync::Arc;

/// An opened deck resource.
///
/// The handle registry owns exactly one `Arc<dyn Deck>` per key and hands
/// out clones to callers. Close and reopen calls are serialized by the
/// lifecycle layer; implementations only need to survive a `close` racing
/// with in-flight reads (return [`Closed`](crate::error::ErrorKind::Closed)).
#[async_trait]
pub trait Deck: Send + Sync + std::fmt::Debug {
    /// The key this deck was opened under.
    fn key(&self) -> &DeckKey;

    /// Close the deck.
    ///
    /// `full_teardown` requests the heavier shutdown path (checkpointing
    /// and the like); `false` is the cheap close used when the deck may be
    /// reopened shortly. Closing is best-effort: callers log and swallow
    /// failures rather than keeping a dead handle around.
    async fn close(&self, full_teardown: bool) -> Result<()>;

    /// Raw journal-mode query, e.g. `"wal"` or `"delete"`.
    ///
    /// The sync client refuses to work on anything but the durable
    /// `"delete"` mode, so the lifecycle layer inspects this before a sync
    /// and forces a reopen if it doesn't match.
    async fn journal_mode(&self) -> Result<String>;

    /// Number of cards in the deck, for status notifications.
    async fn card_count(&self) -> Result<u64>;
}

/// Opens deck resources from their backing files.
#[async_trait]
pub trait DeckStore: Send + Sync {
    /// Open the deck at `key`.
    ///
    /// `rebuild` requests the expensive full-rebuild open (recomputing
    /// derived state); `sync_context` marks the open as being on behalf of
    /// the sync client, which changes the journal mode the deck is opened
    /// with. Failure is recoverable, never fatal.
    async fn open(&self, key: &DeckKey, rebuild: bool, sync_context: bool) -> Result<Arc<dyn Deck>>;
}
