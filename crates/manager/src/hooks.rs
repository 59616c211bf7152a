//! Collaborator hooks.
//!
//! The lifecycle core talks to the rest of the application through these
//! narrow traits: backups around risky opens, widget notifications, and
//! the gate on long-running deck operations that the closer must respect.
//! All of them are best-effort; none of their results affect registry
//! correctness.

use async_trait::async_trait;
use deckhand_store::{Deck, DeckKey};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// When the safety backup before a fresh open is allowed to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupPolicy {
    /// Minimum hours between safety backups of the same deck.
    pub min_interval_hours: u32,
}

impl Default for BackupPolicy {
    fn default() -> Self {
        Self { min_interval_hours: 5 }
    }
}

/// Backup collaborator, invoked around fresh opens.
///
/// Both calls are fire-and-forget from the manager's point of view:
/// implementations log their own failures.
#[async_trait]
pub trait BackupHook: Send + Sync {
    /// Take a safety backup of `key` if the policy says one is due.
    /// Runs before a fresh open so a corrupting open can be rolled back.
    async fn safety_backup_if_needed(&self, key: &DeckKey, policy: &BackupPolicy);

    /// Attempt to restore `key` from backup after an open failed.
    async fn restore_if_missing(&self, key: &DeckKey);
}

/// Widget/status collaborator. Fire-and-forget notifications; no return
/// value is consumed.
#[async_trait]
pub trait WidgetHook: Send + Sync {
    /// The learning widget's deck has been released out from under it.
    async fn notify_released(&self);

    /// A deck was reopened with fresh counts; update any status display.
    async fn notify_status_changed(&self, deck: &Arc<dyn Deck>);
}

/// Tracker for long-running deck operations elsewhere in the process.
///
/// Used only by the closer's pre-step: a deck that the study screen had
/// open is not torn down while such an operation is still running.
#[async_trait]
pub trait TaskGate: Send + Sync {
    fn is_task_running(&self) -> bool;

    /// Resolve once no long-running operation is in flight.
    async fn wait_for_completion(&self);
}

/// No-op backup hook.
pub struct NoBackup;

#[async_trait]
impl BackupHook for NoBackup {
    async fn safety_backup_if_needed(&self, _key: &DeckKey, _policy: &BackupPolicy) {}

    async fn restore_if_missing(&self, key: &DeckKey) {
        tracing::debug!(key = %key, "no backup hook configured; nothing to restore");
    }
}

/// No-op widget hook.
pub struct NoWidget;

#[async_trait]
impl WidgetHook for NoWidget {
    async fn notify_released(&self) {}

    async fn notify_status_changed(&self, _deck: &Arc<dyn Deck>) {}
}

/// Task gate that never reports a running task.
pub struct NoTaskGate;

#[async_trait]
impl TaskGate for NoTaskGate {
    fn is_task_running(&self) -> bool {
        false
    }

    async fn wait_for_completion(&self) {}
}
