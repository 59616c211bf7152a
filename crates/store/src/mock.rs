//! In-memory deck store for testing.

use crate::deck::{Deck, DeckStore};
use crate::error::{ErrorKind, Result};
use crate::key::DeckKey;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// In-memory deck store for testing.
///
/// Decks exist the moment they are opened; there is no backing file. The
/// store counts opens and closes, lets tests override the journal mode a
/// key reports, and can be told to fail opens for specific keys. Ideal for
/// unit tests that need a [`DeckStore`] without filesystem dependencies.
///
/// # Examples
///
/// ```
/// use deckhand_store::{DeckKey, DeckStore, MockStore};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let store = MockStore::new();
/// let deck = store.open(&DeckKey::from("a.anki"), false, false).await?;
/// assert_eq!(deck.journal_mode().await?, "wal");
/// assert_eq!(store.open_count(), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct MockStore {
    state: Arc<MockState>,
}

#[derive(Debug, Default)]
struct MockState {
    journal_modes: Mutex<HashMap<DeckKey, String>>,
    failing: Mutex<HashSet<DeckKey>>,
    opens: AtomicUsize,
    closes: AtomicUsize,
}

fn locked<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the journal mode decks opened under `key` will report.
    ///
    /// Defaults to `"wal"`. An open with `sync_context = true` resets the
    /// key to `"delete"`, mirroring the SQLite implementation.
    pub fn set_journal_mode(&self, key: impl Into<DeckKey>, mode: impl Into<String>) {
        locked(&self.state.journal_modes).insert(key.into(), mode.into());
    }

    /// Make opens of `key` fail (or succeed again) until toggled.
    pub fn fail_opens(&self, key: impl Into<DeckKey>, fail: bool) {
        let key = key.into();
        let mut failing = locked(&self.state.failing);
        if fail {
            failing.insert(key);
        } else {
            failing.remove(&key);
        }
    }

    /// Total successful opens across all keys.
    pub fn open_count(&self) -> usize {
        self.state.opens.load(Ordering::SeqCst)
    }

    /// Total completed closes across all keys.
    pub fn close_count(&self) -> usize {
        self.state.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeckStore for MockStore {
    async fn open(&self, key: &DeckKey, rebuild: bool, sync_context: bool) -> Result<Arc<dyn Deck>> {
        if locked(&self.state.failing).contains(key) {
            return Err(exn::Exn::from(ErrorKind::Open(key.as_path().to_path_buf())));
        }
        if sync_context {
            locked(&self.state.journal_modes).insert(key.clone(), "delete".to_string());
        }
        let journal_mode =
            locked(&self.state.journal_modes).get(key).cloned().unwrap_or_else(|| "wal".to_string());
        self.state.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MockDeck {
            key: key.clone(),
            journal_mode,
            rebuilt: rebuild,
            closed: AtomicBool::new(false),
            state: Arc::clone(&self.state),
        }))
    }
}

/// A deck handed out by [`MockStore`].
#[derive(Debug)]
pub struct MockDeck {
    key: DeckKey,
    journal_mode: String,
    rebuilt: bool,
    closed: AtomicBool,
    state: Arc<MockState>,
}

impl MockDeck {
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Whether this deck was opened with the full-rebuild flag.
    pub fn was_rebuilt(&self) -> bool {
        self.rebuilt
    }
}

#[async_trait]
impl Deck for MockDeck {
    fn key(&self) -> &DeckKey {
        &self.key
    }

    async fn close(&self, _full_teardown: bool) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(exn::Exn::from(ErrorKind::Closed(self.key.as_path().to_path_buf())));
        }
        self.state.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn journal_mode(&self) -> Result<String> {
        if self.is_closed() {
            return Err(exn::Exn::from(ErrorKind::Closed(self.key.as_path().to_path_buf())));
        }
        Ok(self.journal_mode.clone())
    }

    async fn card_count(&self) -> Result<u64> {
        if self.is_closed() {
            return Err(exn::Exn::from(ErrorKind::Closed(self.key.as_path().to_path_buf())));
        }
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_counts() {
        let store = MockStore::new();
        store.open(&DeckKey::from("a.anki"), false, false).await.unwrap();
        store.open(&DeckKey::from("b.anki"), false, false).await.unwrap();
        assert_eq!(store.open_count(), 2);
        assert_eq!(store.close_count(), 0);
    }

    #[tokio::test]
    async fn test_journal_mode_override_and_sync_reset() {
        let store = MockStore::new();
        store.set_journal_mode("a.anki", "truncate");
        let deck = store.open(&DeckKey::from("a.anki"), false, false).await.unwrap();
        assert_eq!(deck.journal_mode().await.unwrap(), "truncate");

        let deck = store.open(&DeckKey::from("a.anki"), false, true).await.unwrap();
        assert_eq!(deck.journal_mode().await.unwrap(), "delete");
    }

    #[tokio::test]
    async fn test_fail_opens_toggle() {
        let store = MockStore::new();
        store.fail_opens("a.anki", true);
        let err = store.open(&DeckKey::from("a.anki"), false, false).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Open(_)));
        assert_eq!(store.open_count(), 0);

        store.fail_opens("a.anki", false);
        store.open(&DeckKey::from("a.anki"), false, false).await.unwrap();
        assert_eq!(store.open_count(), 1);
    }

    #[tokio::test]
    async fn test_double_close_reports_closed() {
        let store = MockStore::new();
        let deck = store.open(&DeckKey::from("a.anki"), false, false).await.unwrap();
        deck.close(false).await.unwrap();
        let err = deck.close(false).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Closed(_)));
        assert_eq!(store.close_count(), 1);
    }
}
