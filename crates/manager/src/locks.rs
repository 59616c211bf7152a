//! Lazily-created per-key locks.

use deckhand_store::DeckKey;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as KeyMutex, OwnedMutexGuard};

/// One mutex per deck key, created on first use.
///
/// All registry bookkeeping for a key happens under that key's lock, which
/// serializes open/close races per deck. The table itself is guarded by a
/// plain mutex held only for the get-or-insert, so lazy creation cannot
/// race. Tokio mutexes wake waiters in FIFO order, which keeps a waiting
/// reopen from starving behind a stream of new acquires. No caller ever
/// holds two keys' locks at once, so there is no lock ordering to get
/// wrong.
#[derive(Default)]
pub(crate) struct KeyLockTable {
    table: Mutex<HashMap<DeckKey, Arc<KeyMutex<()>>>>,
}

impl KeyLockTable {
    /// Acquire the lock for `key`, creating it on first use.
    pub(crate) async fn lock(&self, key: &DeckKey) -> OwnedMutexGuard<()> {
        let mutex = {
            let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(table.entry(key.clone()).or_insert_with(|| Arc::new(KeyMutex::new(()))))
        };
        mutex.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_same_key_serializes() {
        let table = Arc::new(KeyLockTable::default());
        let key = DeckKey::from("a.anki");

        let guard = table.lock(&key).await;
        let contender = tokio::spawn({
            let table = Arc::clone(&table);
            let key = key.clone();
            async move {
                let _guard = table.lock(&key).await;
            }
        });
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
        assert!(!contender.is_finished(), "second lock on the same key should block");

        drop(guard);
        contender.await.unwrap();
    }

    #[tokio::test]
    async fn test_different_keys_are_independent() {
        let table = KeyLockTable::default();
        let _a = table.lock(&DeckKey::from("a.anki")).await;
        // Must not block.
        let _b = table.lock(&DeckKey::from("b.anki")).await;
    }

    #[tokio::test]
    async fn test_lock_is_reusable_after_release() {
        let table = KeyLockTable::default();
        let key = DeckKey::from("a.anki");
        drop(table.lock(&key).await);
        drop(table.lock(&key).await);
    }
}
