//! The deck handle manager.

use crate::closer::{self, CloseRequest, CloseTask};
use crate::error::{ErrorKind, Result};
use crate::hooks::{BackupHook, BackupPolicy, NoBackup, NoTaskGate, NoWidget, TaskGate, WidgetHook};
use crate::locks::KeyLockTable;
use crate::registry::{HandleRecord, Registry};
use crate::requester::Requester;
use deckhand_store::{Deck, DeckKey, DeckStore};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

/// Options for [`DeckManager::acquire_with`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcquireOptions {
    /// Designate the deck as the process-wide main deck on success.
    pub make_main: bool,
    /// Request the expensive full-rebuild open. Honored at most once per
    /// open lifetime of the handle.
    pub rebuild: bool,
    /// Take a safety backup before opening a deck that isn't loaded yet.
    pub safety_backup: bool,
}

impl Default for AcquireOptions {
    fn default() -> Self {
        Self { make_main: false, rebuild: true, safety_backup: true }
    }
}

/// What a release call did. None of these are errors: a missing record or
/// an in-flight close are ordinary, logged, and leave state untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// No record is registered under the key.
    NotLoaded,
    /// A close was already in flight; nothing was scheduled twice.
    AlreadyClosing,
    /// Other requesters still hold the deck; the record stays.
    Retained,
    /// The last opener left and exactly one closer was scheduled.
    CloseScheduled,
}

/// Coordinates shared access to named deck files inside one process.
///
/// Many independent subsystems (a [`Requester`] each) can ask for the same
/// deck at once. The manager reference-counts openers per key, serializes
/// open/close bookkeeping through a per-key lock, tears decks down on a
/// background task once the last opener leaves, and tracks a single
/// process-wide "main" deck for callers that don't name one.
///
/// The manager is an ordinary owned value with no ambient global state;
/// clones share the same registry, so construct one per logical registry
/// and hand out clones.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use deckhand_manager::{DeckManager, Requester};
/// use deckhand_store::{DeckKey, SqliteStore};
///
/// # async fn example() -> deckhand_manager::error::Result<()> {
/// let manager = DeckManager::new(Arc::new(SqliteStore::new()));
/// let key = DeckKey::from("decks/french.anki");
///
/// let deck = manager.acquire(&key, Requester::Study).await?;
/// println!("{} cards", deck.card_count().await.unwrap_or(0));
/// manager.release(&key, Some(Requester::Study), true).await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct DeckManager {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn DeckStore>,
    backup: Arc<dyn BackupHook>,
    widget: Arc<dyn WidgetHook>,
    task_gate: Arc<dyn TaskGate>,
    backup_policy: BackupPolicy,
    locks: KeyLockTable,
    registry: Registry,
    main: Mutex<Option<DeckKey>>,
}

/// Builder for [`DeckManager`], wiring in the optional collaborators.
pub struct DeckManagerBuilder {
    store: Arc<dyn DeckStore>,
    backup: Arc<dyn BackupHook>,
    widget: Arc<dyn WidgetHook>,
    task_gate: Arc<dyn TaskGate>,
    backup_policy: BackupPolicy,
}

impl DeckManagerBuilder {
    pub fn with_backup(mut self, backup: Arc<dyn BackupHook>) -> Self {
        self.backup = backup;
        self
    }

    pub fn with_widget(mut self, widget: Arc<dyn WidgetHook>) -> Self {
        self.widget = widget;
        self
    }

    pub fn with_task_gate(mut self, task_gate: Arc<dyn TaskGate>) -> Self {
        self.task_gate = task_gate;
        self
    }

    pub fn with_backup_policy(mut self, policy: BackupPolicy) -> Self {
        self.backup_policy = policy;
        self
    }

    pub fn build(self) -> DeckManager {
        DeckManager {
            inner: Arc::new(Inner {
                store: self.store,
                backup: self.backup,
                widget: self.widget,
                task_gate: self.task_gate,
                backup_policy: self.backup_policy,
                locks: KeyLockTable::default(),
                registry: Registry::default(),
                main: Mutex::new(None),
            }),
        }
    }
}

/// Result of one locked acquire attempt.
enum Attempt {
    Ready(Arc<dyn Deck>),
    /// An in-flight close must finish first; join it and start over.
    Retry(CloseTask),
}

/// What the registry inspection decided, computed under the registry lock
/// so the opener set and close task are read consistently.
enum Plan {
    /// No record: open fresh from storage.
    Fresh,
    /// Join this close task, then retry the acquire from the top.
    Wait(CloseTask),
    /// The sync client holds the deck exclusively.
    Refused,
    /// Record found (possibly revived from a cancelled close); maybe run
    /// one of the reopen side paths before returning the handle.
    Existing { deck: Arc<dyn Deck>, side: SidePath },
}

enum SidePath {
    None,
    Sync { migrate: bool },
    Rebuild,
}

impl DeckManager {
    /// A manager with no-op collaborators; see [`DeckManager::builder`] to
    /// wire in backups, widget notifications, and the task gate.
    pub fn new(store: Arc<dyn DeckStore>) -> Self {
        Self::builder(store).build()
    }

    pub fn builder(store: Arc<dyn DeckStore>) -> DeckManagerBuilder {
        DeckManagerBuilder {
            store,
            backup: Arc::new(NoBackup),
            widget: Arc::new(NoWidget),
            task_gate: Arc::new(NoTaskGate),
            backup_policy: BackupPolicy::default(),
        }
    }

    /// Acquire the deck at `key` with default options, opening it if
    /// needed.
    pub async fn acquire(&self, key: &DeckKey, requester: Requester) -> Result<Arc<dyn Deck>> {
        self.acquire_with(key, requester, AcquireOptions::default()).await
    }

    /// Acquire the deck at `key`, opening it if needed.
    ///
    /// Acquiring a deck the requester already holds is a no-op that
    /// returns the same handle. If the deck is mid-close, the close is
    /// either cancelled and the handle revived, or — when the closer is
    /// pinned waiting on a long-running operation — awaited, after which
    /// the acquire starts over (the deck may be fully gone by then and get
    /// reopened from storage).
    ///
    /// One acquire may perform synchronous storage I/O before returning:
    /// the fresh open itself, or the close-and-reopen forced by the
    /// rebuild and journal-mode paths.
    pub async fn acquire_with(&self, key: &DeckKey, requester: Requester, options: AcquireOptions) -> Result<Arc<dyn Deck>> {
        loop {
            let guard = self.inner.locks.lock(key).await;
            match self.try_acquire(key, requester, &options).await? {
                Attempt::Ready(deck) => {
                    if options.make_main {
                        self.set_main(key.clone());
                    }
                    return Ok(deck);
                }
                Attempt::Retry(task) => {
                    drop(guard);
                    debug!(key = %key, "deck is closing; waiting for teardown before retrying");
                    task.join().await;
                }
            }
        }
    }

    /// One attempt at the acquire, made while holding the key lock.
    async fn try_acquire(&self, key: &DeckKey, requester: Requester, options: &AcquireOptions) -> Result<Attempt> {
        let plan = self
            .inner
            .registry
            .with_record(key, |record| {
                if let Some(task) = record.closing() {
                    let task = task.clone();
                    if record.wait_requested {
                        // The closer is pinned until a long-running deck
                        // operation finishes; let it.
                        return Plan::Wait(task);
                    }
                    if task.cancel() {
                        // Revived. The cancelled closer will leave this
                        // record alone, so the opener set restarts empty
                        // and gets repopulated below.
                        debug!(key = %key, "cancelled in-flight close; reviving handle");
                        record.openers.clear();
                        record.close_task = None;
                    } else {
                        // Close I/O already started; it has to finish.
                        return Plan::Wait(task);
                    }
                } else if record.close_task.is_some() {
                    record.close_task = None;
                }

                if !requester.is_exclusive()
                    && record.journal_migrated
                    && record.has_opener(Requester::SyncClient)
                {
                    return Plan::Refused;
                }

                if record.add_opener(requester) {
                    debug!(key = %key, requester = %requester, opened_by = ?record.openers, "added opener");
                } else {
                    debug!(key = %key, requester = %requester, "already an opener");
                }

                let side = if requester == Requester::SyncClient {
                    SidePath::Sync { migrate: !record.journal_migrated }
                } else if options.rebuild && !record.initially_rebuilt {
                    SidePath::Rebuild
                } else {
                    SidePath::None
                };
                Plan::Existing { deck: Arc::clone(&record.deck), side }
            })
            .unwrap_or(Plan::Fresh);

        match plan {
            Plan::Wait(task) => Ok(Attempt::Retry(task)),
            Plan::Refused => {
                debug!(key = %key, requester = %requester, "refused: sync client holds the deck");
                Err(exn::Exn::from(ErrorKind::SyncExclusive(key.clone())))
            }
            Plan::Fresh => self.open_fresh(key, requester, options).await.map(Attempt::Ready),
            Plan::Existing { deck, side } => {
                let deck = match side {
                    SidePath::None => deck,
                    SidePath::Sync { migrate } => self.sync_takeover(key, deck, migrate, options).await?,
                    SidePath::Rebuild => self.rebuild_reopen(key, deck).await?,
                };
                Ok(Attempt::Ready(deck))
            }
        }
    }

    async fn open_fresh(&self, key: &DeckKey, requester: Requester, options: &AcquireOptions) -> Result<Arc<dyn Deck>> {
        if options.safety_backup {
            self.inner.backup.safety_backup_if_needed(key, &self.inner.backup_policy).await;
        }
        match self.inner.store.open(key, options.rebuild, requester == Requester::SyncClient).await {
            Ok(deck) => {
                self.inner
                    .registry
                    .insert(key.clone(), HandleRecord::new(Arc::clone(&deck), requester, options.rebuild));
                debug!(key = %key, requester = %requester, "deck opened");
                Ok(deck)
            }
            Err(err) => {
                warn!(key = %key, error = %err, "deck could not be opened; attempting restore");
                self.inner.backup.restore_if_missing(key).await;
                Err(err.raise(ErrorKind::Open(key.clone())))
            }
        }
    }

    /// The sync client is taking the deck: evict the learning widget and,
    /// once per open lifetime, force the durable journal mode by reopening
    /// if necessary.
    async fn sync_takeover(
        &self,
        key: &DeckKey,
        deck: Arc<dyn Deck>,
        migrate: bool,
        options: &AcquireOptions,
    ) -> Result<Arc<dyn Deck>> {
        self.inner.widget.notify_released().await;
        let evicted = self.inner.registry.with_record(key, |record| record.remove_opener(Requester::BigWidget));
        if evicted.unwrap_or(false) {
            debug!(key = %key, "evicted big widget for sync");
        }

        if !migrate {
            return Ok(deck);
        }
        let deck = match deck.journal_mode().await {
            Ok(mode) if !mode.eq_ignore_ascii_case("delete") => {
                debug!(key = %key, mode, "journal mode not durable; reopening for sync");
                self.reopen(key, &deck, options.rebuild, true).await?
            }
            Ok(_) => deck,
            Err(err) => {
                // Leave the migration un-done; the next sync acquire
                // checks again.
                warn!(key = %key, error = %err, "could not inspect journal mode");
                return Ok(deck);
            }
        };
        self.inner.registry.with_record(key, |record| record.journal_migrated = true);
        Ok(deck)
    }

    async fn rebuild_reopen(&self, key: &DeckKey, deck: Arc<dyn Deck>) -> Result<Arc<dyn Deck>> {
        debug!(key = %key, "reopening deck for full rebuild");
        let deck = self.reopen(key, &deck, true, false).await?;
        self.inner.registry.with_record(key, |record| record.initially_rebuilt = true);
        self.inner.widget.notify_status_changed(&deck).await;
        Ok(deck)
    }

    /// Close `old` and replace the record's handle with a fresh open.
    async fn reopen(&self, key: &DeckKey, old: &Arc<dyn Deck>, rebuild: bool, sync_context: bool) -> Result<Arc<dyn Deck>> {
        if let Err(err) = old.close(false).await {
            warn!(key = %key, error = %err, "old handle did not close cleanly before reopen");
        }
        match self.inner.store.open(key, rebuild, sync_context).await {
            Ok(deck) => {
                self.inner.registry.with_record(key, |record| record.deck = Arc::clone(&deck));
                Ok(deck)
            }
            Err(err) => {
                // The old handle is already closed; a record pointing at
                // it would be a zombie. Drop it and fall back to restore.
                warn!(key = %key, error = %err, "reopen failed; dropping record");
                self.inner.registry.remove(key);
                self.inner.backup.restore_if_missing(key).await;
                Err(err.raise(ErrorKind::Open(key.clone())))
            }
        }
    }

    /// Release `requester`'s hold on the deck at `key`.
    ///
    /// `None` releases unconditionally: every opener is cleared and the
    /// deck is torn down regardless of who still held it. When the last
    /// opener leaves, teardown runs on a background task; pass
    /// `wait_to_finish` to block until it completes instead of letting it
    /// run behind the caller.
    pub async fn release(&self, key: &DeckKey, requester: Option<Requester>, wait_to_finish: bool) -> ReleaseOutcome {
        let guard = self.inner.locks.lock(key).await;

        let step = self.inner.registry.with_record(key, |record| {
            if record.closing().is_some() {
                debug!(key = %key, "deck is already closing");
                return (ReleaseOutcome::AlreadyClosing, None, false);
            }

            let snapshot = record.openers.clone();
            match requester {
                Some(requester) => {
                    if !record.remove_opener(requester) {
                        debug!(key = %key, requester = %requester, "deck was not held by this requester");
                    }
                }
                None => record.openers.clear(),
            }

            if !record.openers.is_empty() {
                debug!(key = %key, still_open_by = ?record.openers, "deck retained");
                let widget_left =
                    requester == Some(Requester::BigWidget) && snapshot.contains(&Requester::BigWidget);
                return (ReleaseOutcome::Retained, None, widget_left);
            }

            let task = closer::spawn(
                self.inner.registry.clone(),
                Arc::clone(&self.inner.task_gate),
                CloseRequest {
                    key: key.clone(),
                    trigger: requester,
                    deck: Arc::clone(&record.deck),
                    had_study: snapshot.contains(&Requester::Study),
                },
            );
            record.close_task = Some(task.clone());
            debug!(key = %key, requester = ?requester, "last opener left; close scheduled");
            (ReleaseOutcome::CloseScheduled, Some(task), false)
        });

        let (outcome, task, widget_left) = match step {
            Some(step) => step,
            None => {
                warn!(key = %key, "deck is not loaded; nothing to release");
                (ReleaseOutcome::NotLoaded, None, false)
            }
        };

        if outcome == ReleaseOutcome::CloseScheduled {
            // No main deck while one is closing.
            let mut main = self.main_slot();
            if main.as_ref() == Some(key) {
                *main = None;
            }
        }
        if widget_left {
            self.inner.widget.notify_released().await;
        }

        drop(guard);
        if wait_to_finish {
            if let Some(task) = task {
                task.join().await;
            }
        }
        outcome
    }

    /// Close the deck at `key` regardless of who holds it open.
    pub async fn force_close(&self, key: &DeckKey) -> ReleaseOutcome {
        self.release(key, None, true).await
    }

    /// Unconditionally close every registered deck.
    pub async fn close_all(&self, wait_to_finish: bool) {
        let closes = self.inner.registry.keys().into_iter().map(|key| {
            let manager = self.clone();
            async move {
                manager.release(&key, None, wait_to_finish).await;
            }
        });
        futures::future::join_all(closes).await;
    }

    /// Settle any in-flight teardown for `key` before proceeding.
    pub async fn wait_for_closer(&self, key: &DeckKey) {
        let task = self.inner.registry.with_record(key, |record| record.closing().cloned()).flatten();
        if let Some(task) = task {
            debug!(key = %key, "waiting for in-flight close to settle");
            task.join().await;
        }
    }

    fn main_slot(&self) -> MutexGuard<'_, Option<DeckKey>> {
        self.inner.main.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Designate `key` as the main deck. No validation: the key does not
    /// have to be open (the main deck reloads lazily).
    pub fn set_main(&self, key: impl Into<DeckKey>) {
        *self.main_slot() = Some(key.into());
    }

    pub fn clear_main(&self) {
        *self.main_slot() = None;
    }

    pub fn main_key(&self) -> Option<DeckKey> {
        self.main_slot().clone()
    }

    /// The main deck, only if it is currently registered. Never reloads.
    pub fn main_deck(&self) -> Option<Arc<dyn Deck>> {
        let key = self.main_key()?;
        self.inner.registry.deck(&key)
    }

    /// The main deck, reopened through [`acquire`](Self::acquire) if it is
    /// no longer loaded. Returns `Ok(None)` when no main deck is
    /// designated. This is the only path that reopens the main deck
    /// implicitly.
    pub async fn main_deck_or_reload(&self, requester: Requester) -> Result<Option<Arc<dyn Deck>>> {
        let Some(key) = self.main_key() else {
            return Ok(None);
        };
        self.acquire(&key, requester).await.map(Some)
    }

    /// Close the main deck (if it is registered) and always clear the
    /// designation, even when other openers keep the deck itself alive.
    /// Main designation is a single slot, not reference counted.
    pub async fn close_main(&self, requester: Option<Requester>, wait_to_finish: bool) -> ReleaseOutcome {
        let main = self.main_key();
        let outcome = match main {
            Some(ref key) if self.inner.registry.contains(key) => self.release(key, requester, wait_to_finish).await,
            _ => ReleaseOutcome::NotLoaded,
        };
        self.clear_main();
        outcome
    }

    /// Whether the learning widget currently holds the deck at `key`.
    pub fn is_open_in_big_widget(&self, key: &DeckKey) -> bool {
        self.inner.registry.with_record(key, |record| record.has_opener(Requester::BigWidget)).unwrap_or(false)
    }

    /// If the main deck is held by the learning widget, release the
    /// widget's hold. Returns whether anything was released.
    pub async fn close_main_if_in_big_widget(&self) -> bool {
        let Some(key) = self.main_key() else {
            return false;
        };
        if !self.is_open_in_big_widget(&key) {
            return false;
        }
        self.release(&key, Some(Requester::BigWidget), true).await;
        true
    }

    /// Keys of all currently registered decks, for diagnostics.
    pub fn open_keys(&self) -> Vec<DeckKey> {
        self.inner.registry.keys()
    }
}
