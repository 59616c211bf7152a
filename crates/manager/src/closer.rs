//! Background deck teardown.
//!
//! Closing a deck does real I/O, so it runs off the caller's path as a
//! spawned task. The task is observable and cancellable through
//! [`CloseTask`]: acquirers that want the deck back cancel it, acquirers
//! that must let it finish join it. Cancellation is cooperative and
//! checked at two boundaries only; once the actual close I/O has started
//! it always runs to completion so the deck is never left half-closed.

use crate::hooks::TaskGate;
use crate::registry::Registry;
use crate::requester::Requester;
use deckhand_store::{Deck, DeckKey};
use std::sync::Arc;
use tokio::sync::watch;

/// Observable state of a close task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseState {
    /// Spawned; close I/O has not started. Cancellation still wins here.
    Running,
    /// Close I/O has started and will run to completion.
    Closing,
    /// Cancelled before any close I/O. The deck is still open and the
    /// registry record was left for the canceller to revive.
    Cancelled,
    /// Teardown finished and the record was removed from the registry.
    Completed,
}

impl CloseState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Completed)
    }
}

/// Handle to an in-flight deck close.
///
/// Clones share the same underlying task. State transitions are published
/// through a [`watch`] channel, so [`join`](Self::join) is a real wakeup,
/// not a poll loop.
#[derive(Clone)]
pub struct CloseTask {
    state: watch::Sender<CloseState>,
}

impl CloseTask {
    pub fn state(&self) -> CloseState {
        *self.state.borrow()
    }

    pub fn is_in_flight(&self) -> bool {
        !self.state().is_terminal()
    }

    /// Request cancellation.
    ///
    /// Returns `true` if cancellation won: the task had not started its
    /// close I/O and will abort without touching the deck or the registry.
    /// The caller is then responsible for reviving the record (resetting
    /// its opener set). Returns `false` once the close step has begun or
    /// the task already finished; the caller must [`join`](Self::join) and
    /// treat the deck as gone.
    pub fn cancel(&self) -> bool {
        self.state.send_if_modified(|state| {
            if *state == CloseState::Running {
                *state = CloseState::Cancelled;
                true
            } else {
                false
            }
        })
    }

    /// Wait until the task reaches a terminal state.
    pub async fn join(&self) {
        let mut rx = self.state.subscribe();
        // Cannot fail: we hold a sender ourselves.
        _ = rx.wait_for(CloseState::is_terminal).await;
    }
}

/// Everything the closer needs, snapshotted at spawn time.
pub(crate) struct CloseRequest {
    pub(crate) key: DeckKey,
    /// Requester that triggered the close (`None` for unconditional).
    pub(crate) trigger: Option<Requester>,
    pub(crate) deck: Arc<dyn Deck>,
    /// Whether the study screen was among the openers before they were
    /// cleared. Decides the pre-step wait below.
    pub(crate) had_study: bool,
}

/// Spawn a closer for `request` and return its handle.
pub(crate) fn spawn(registry: Registry, task_gate: Arc<dyn TaskGate>, request: CloseRequest) -> CloseTask {
    let (tx, _rx) = watch::channel(CloseState::Running);
    let task = CloseTask { state: tx.clone() };
    tokio::spawn(run(tx, registry, task_gate, request));
    task
}

async fn run(
    state: watch::Sender<CloseState>,
    registry: Registry,
    task_gate: Arc<dyn TaskGate>,
    request: CloseRequest,
) {
    let CloseRequest { key, trigger, deck, had_study } = request;

    // Pre-step: the study screen may have a long-running deck operation in
    // flight. If anyone but the study screen itself triggered this close,
    // block until that operation is done rather than closing underneath
    // it. While blocked, `wait_requested` tells acquirers to wait for us
    // instead of cancelling.
    if had_study && trigger != Some(Requester::Study) && task_gate.is_task_running() {
        registry.set_wait_requested(&key, true);
        let mut rx = state.subscribe();
        let cancelled = tokio::select! {
            _ = task_gate.wait_for_completion() => false,
            _ = rx.wait_for(|s| *s == CloseState::Cancelled) => true,
        };
        registry.set_wait_requested(&key, false);
        if cancelled {
            tracing::debug!(key = %key, "close cancelled while waiting for background task");
            return;
        }
    }

    // Close step. Losing the race to a cancel means an acquirer revived
    // the record; leave everything alone.
    let begun = state.send_if_modified(|s| {
        if *s == CloseState::Running {
            *s = CloseState::Closing;
            true
        } else {
            false
        }
    });
    if !begun {
        tracing::debug!(key = %key, "close cancelled before teardown started");
        return;
    }

    match deck.close(false).await {
        Ok(()) => tracing::debug!(key = %key, "deck closed"),
        // Best-effort: a failed close still tears the record down so no
        // zombie entry survives in the registry.
        Err(err) => tracing::warn!(key = %key, error = %err, "deck did not close cleanly; dropping handle anyway"),
    }

    registry.remove(&key);
    tracing::debug!(key = %key, still_loaded = ?registry.keys(), "deck removed from registry");
    _ = state.send(CloseState::Completed);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::NoTaskGate;
    use crate::registry::HandleRecord;
    use deckhand_store::{DeckStore, MockStore};

    async fn setup(store: &MockStore, key: &DeckKey) -> (Registry, Arc<dyn Deck>) {
        let deck = store.open(key, false, false).await.unwrap();
        let registry = Registry::default();
        registry.insert(key.clone(), HandleRecord::new(Arc::clone(&deck), Requester::DeckPicker, false));
        (registry, deck)
    }

    fn request(key: &DeckKey, deck: &Arc<dyn Deck>) -> CloseRequest {
        CloseRequest {
            key: key.clone(),
            trigger: Some(Requester::DeckPicker),
            deck: Arc::clone(deck),
            had_study: false,
        }
    }

    #[tokio::test]
    async fn test_runs_to_completion_and_removes_record() {
        let store = MockStore::new();
        let key = DeckKey::from("a.anki");
        let (registry, deck) = setup(&store, &key).await;

        let task = spawn(registry.clone(), Arc::new(NoTaskGate), request(&key, &deck));
        task.join().await;

        assert_eq!(task.state(), CloseState::Completed);
        assert!(!registry.contains(&key));
        assert_eq!(store.close_count(), 1);
    }

    #[tokio::test]
    async fn test_cancel_before_poll_aborts_without_io() {
        let store = MockStore::new();
        let key = DeckKey::from("a.anki");
        let (registry, deck) = setup(&store, &key).await;

        // On a current-thread runtime the spawned task has not run yet, so
        // the cancel always wins.
        let task = spawn(registry.clone(), Arc::new(NoTaskGate), request(&key, &deck));
        assert!(task.cancel());
        task.join().await;

        assert_eq!(task.state(), CloseState::Cancelled);
        assert!(registry.contains(&key), "cancelled closer must not remove the record");
        assert_eq!(store.close_count(), 0);
    }

    #[tokio::test]
    async fn test_cancel_after_completion_is_refused() {
        let store = MockStore::new();
        let key = DeckKey::from("a.anki");
        let (registry, deck) = setup(&store, &key).await;

        let task = spawn(registry.clone(), Arc::new(NoTaskGate), request(&key, &deck));
        task.join().await;
        assert!(!task.cancel());
        assert_eq!(task.state(), CloseState::Completed);
    }

    #[tokio::test]
    async fn test_second_cancel_is_refused() {
        let store = MockStore::new();
        let key = DeckKey::from("a.anki");
        let (registry, deck) = setup(&store, &key).await;

        let task = spawn(registry.clone(), Arc::new(NoTaskGate), request(&key, &deck));
        assert!(task.cancel());
        assert!(!task.cancel());
    }

    #[tokio::test]
    async fn test_close_failure_still_removes_record() {
        let store = MockStore::new();
        let key = DeckKey::from("a.anki");
        let (registry, deck) = setup(&store, &key).await;
        // Close the deck out of band so the closer's own close fails.
        deck.close(false).await.unwrap();

        let task = spawn(registry.clone(), Arc::new(NoTaskGate), request(&key, &deck));
        task.join().await;

        assert_eq!(task.state(), CloseState::Completed);
        assert!(!registry.contains(&key), "teardown must be best-effort");
    }
}
