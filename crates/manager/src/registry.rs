//! The authoritative handle state.

use crate::closer::CloseTask;
use crate::requester::Requester;
use deckhand_store::{Deck, DeckKey};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

/// Lifecycle state for one open deck.
///
/// A record lives in the [`Registry`] exactly as long as it has at least
/// one opener or an in-flight close task. A record with neither is garbage
/// and must not exist.
pub(crate) struct HandleRecord {
    /// The opened resource. Exclusively owned by this record; callers get
    /// clones of the `Arc` but close/reopen goes through the record.
    pub(crate) deck: Arc<dyn Deck>,
    /// Requesters currently holding the deck open. Duplicates suppressed;
    /// insertion order is kept for diagnostics only.
    pub(crate) openers: Vec<Requester>,
    /// Whether the expensive full-rebuild open has already run for this
    /// open lifetime. Later rebuild requests are no-ops until the deck is
    /// reopened from scratch.
    pub(crate) initially_rebuilt: bool,
    /// Whether the one-time migration to the durable journal mode has run
    /// for this open lifetime (sync client only).
    pub(crate) journal_migrated: bool,
    /// Set while an in-flight closer is blocked waiting for a long-running
    /// deck operation to finish. Acquirers that see this must wait for the
    /// closer instead of cancelling it.
    pub(crate) wait_requested: bool,
    /// The in-flight close task, if teardown is underway.
    pub(crate) close_task: Option<CloseTask>,
}

impl HandleRecord {
    pub(crate) fn new(deck: Arc<dyn Deck>, opener: Requester, initially_rebuilt: bool) -> Self {
        Self {
            deck,
            openers: vec![opener],
            initially_rebuilt,
            journal_migrated: false,
            wait_requested: false,
            close_task: None,
        }
    }

    /// Add `requester` to the opener set; returns `false` if it was
    /// already present.
    pub(crate) fn add_opener(&mut self, requester: Requester) -> bool {
        if self.openers.contains(&requester) {
            return false;
        }
        self.openers.push(requester);
        true
    }

    /// Remove `requester` from the opener set; returns `true` if it was
    /// present.
    pub(crate) fn remove_opener(&mut self, requester: Requester) -> bool {
        let before = self.openers.len();
        self.openers.retain(|opener| *opener != requester);
        self.openers.len() != before
    }

    pub(crate) fn has_opener(&self, requester: Requester) -> bool {
        self.openers.contains(&requester)
    }

    /// The close task, but only while it is actually in flight.
    pub(crate) fn closing(&self) -> Option<&CloseTask> {
        self.close_task.as_ref().filter(|task| task.is_in_flight())
    }
}

/// Mapping from deck key to [`HandleRecord`].
///
/// The inner mutex is held only for map access, never across an `await`.
/// Per-key ordering of record mutations comes from the
/// [`KeyLockTable`](crate::locks::KeyLockTable), not from this mutex; the
/// closer is the one writer that bypasses the key lock, and it touches
/// only `wait_requested` and final removal.
#[derive(Clone, Default)]
pub(crate) struct Registry {
    records: Arc<Mutex<HashMap<DeckKey, HandleRecord>>>,
}

impl Registry {
    fn with<R>(&self, f: impl FnOnce(&mut HashMap<DeckKey, HandleRecord>) -> R) -> R {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut records)
    }

    /// Run `f` against the record for `key`, if one exists.
    pub(crate) fn with_record<R>(&self, key: &DeckKey, f: impl FnOnce(&mut HandleRecord) -> R) -> Option<R> {
        self.with(|records| records.get_mut(key).map(f))
    }

    pub(crate) fn insert(&self, key: DeckKey, record: HandleRecord) {
        self.with(|records| records.insert(key, record));
    }

    pub(crate) fn remove(&self, key: &DeckKey) -> Option<HandleRecord> {
        self.with(|records| records.remove(key))
    }

    pub(crate) fn contains(&self, key: &DeckKey) -> bool {
        self.with(|records| records.contains_key(key))
    }

    pub(crate) fn deck(&self, key: &DeckKey) -> Option<Arc<dyn Deck>> {
        self.with_record(key, |record| Arc::clone(&record.deck))
    }

    pub(crate) fn keys(&self) -> Vec<DeckKey> {
        self.with(|records| records.keys().cloned().collect())
    }

    pub(crate) fn set_wait_requested(&self, key: &DeckKey, value: bool) {
        self.with_record(key, |record| record.wait_requested = value);
    }
}
