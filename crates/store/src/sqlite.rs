//! SQLite deck implementation.

use crate::deck::{Deck, DeckStore};
use crate::error::{ErrorKind, Result};
use crate::key::DeckKey;
use async_trait::async_trait;
use exn::ResultExt;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous};
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

// Decks are touched by one subsystem at a time; a couple of connections
// cover overlapping readers.
const MAX_CONNECTIONS: u32 = 2;

/// Minimal schema so that brand-new deck files answer count queries.
const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS cards (id INTEGER PRIMARY KEY, due INTEGER NOT NULL DEFAULT 0)";

/// Opens [`SqliteDeck`]s from deck files on disk.
///
/// Normal opens use WAL journal mode. Opens on behalf of the sync client
/// (`sync_context = true`) use the durable `delete` journal mode instead,
/// which is what the sync protocol requires of the file it uploads.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    create_if_missing: bool,
}

impl SqliteStore {
    pub fn new() -> Self {
        Self { create_if_missing: true }
    }

    /// Refuse to create deck files that don't already exist.
    pub fn existing_only(mut self) -> Self {
        self.create_if_missing = false;
        self
    }

    fn connect_options(&self, key: &DeckKey, sync_context: bool) -> SqliteConnectOptions {
        let journal = if sync_context { SqliteJournalMode::Delete } else { SqliteJournalMode::Wal };
        SqliteConnectOptions::new()
            .filename(key.as_path())
            .create_if_missing(self.create_if_missing)
            .journal_mode(journal)
            .foreign_keys(true)
            // PRAGMA synchronous = NORMAL (balance between safety and speed)
            .synchronous(SqliteSynchronous::Normal)
            // Concurrent openers back off instead of failing with SQLITE_BUSY.
            .busy_timeout(Duration::from_millis(1500))
    }
}

impl Default for SqliteStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeckStore for SqliteStore {
    #[instrument(skip(self), fields(key = %key))]
    async fn open(&self, key: &DeckKey, rebuild: bool, sync_context: bool) -> Result<Arc<dyn Deck>> {
        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect_with(self.connect_options(key, sync_context))
            .await
            .or_raise(|| ErrorKind::Open(key.as_path().to_path_buf()))?;
        sqlx::query(SCHEMA).execute(&pool).await.or_raise(|| ErrorKind::Open(key.as_path().to_path_buf()))?;
        if rebuild {
            // The full-rebuild open recomputes derived state; for the SQLite
            // layer that means refreshing the query planner statistics.
            sqlx::query("ANALYZE").execute(&pool).await.or_raise(|| ErrorKind::Database)?;
        }
        tracing::debug!(key = %key, rebuild, sync_context, "deck opened");
        Ok(Arc::new(SqliteDeck { key: key.clone(), pool }))
    }
}

/// A deck backed by a SQLite connection pool.
#[derive(Debug)]
pub struct SqliteDeck {
    key: DeckKey,
    pool: SqlitePool,
}

impl SqliteDeck {
    /// Whether the underlying pool has been closed.
    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }
}

#[async_trait]
impl Deck for SqliteDeck {
    fn key(&self) -> &DeckKey {
        &self.key
    }

    async fn close(&self, full_teardown: bool) -> Result<()> {
        if self.pool.is_closed() {
            return Err(exn::Exn::from(ErrorKind::Closed(self.key.as_path().to_path_buf())));
        }
        if full_teardown {
            _ = sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)").execute(&self.pool).await;
        }
        // Let SQLite update query planner statistics
        _ = sqlx::query("PRAGMA optimize").execute(&self.pool).await;
        self.pool.close().await;
        tracing::debug!(key = %self.key, full_teardown, "deck closed");
        Ok(())
    }

    async fn journal_mode(&self) -> Result<String> {
        let mode: String = sqlx::query_scalar("PRAGMA journal_mode")
            .fetch_one(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(mode)
    }

    async fn card_count(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM cards")
            .fetch_one(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn deck_key(dir: &TempDir, name: &str) -> DeckKey {
        DeckKey::from(dir.path().join(name))
    }

    #[tokio::test]
    async fn test_open_uses_wal_by_default() {
        let dir = TempDir::new().unwrap();
        let deck = SqliteStore::new().open(&deck_key(&dir, "a.anki"), false, false).await.unwrap();
        assert_eq!(deck.journal_mode().await.unwrap().to_lowercase(), "wal");
        deck.close(false).await.unwrap();
    }

    #[tokio::test]
    async fn test_sync_context_forces_delete_journal_mode() {
        let dir = TempDir::new().unwrap();
        let deck = SqliteStore::new().open(&deck_key(&dir, "a.anki"), false, true).await.unwrap();
        assert_eq!(deck.journal_mode().await.unwrap().to_lowercase(), "delete");
        deck.close(false).await.unwrap();
    }

    #[tokio::test]
    async fn test_fresh_deck_has_zero_cards() {
        let dir = TempDir::new().unwrap();
        let deck = SqliteStore::new().open(&deck_key(&dir, "a.anki"), true, false).await.unwrap();
        assert_eq!(deck.card_count().await.unwrap(), 0);
        deck.close(true).await.unwrap();
    }

    #[tokio::test]
    async fn test_double_close_reports_closed() {
        let dir = TempDir::new().unwrap();
        let deck = SqliteStore::new().open(&deck_key(&dir, "a.anki"), false, false).await.unwrap();
        deck.close(false).await.unwrap();
        let err = deck.close(false).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Closed(_)));
    }

    #[tokio::test]
    async fn test_existing_only_refuses_missing_file() {
        let dir = TempDir::new().unwrap();
        let err = SqliteStore::new()
            .existing_only()
            .open(&deck_key(&dir, "missing.anki"), false, false)
            .await
            .unwrap_err();
        assert!(matches!(&*err, ErrorKind::Open(_)));
    }

    #[tokio::test]
    async fn test_reopen_after_close() {
        let dir = TempDir::new().unwrap();
        let key = deck_key(&dir, "a.anki");
        let store = SqliteStore::new();
        let deck = store.open(&key, false, false).await.unwrap();
        deck.close(false).await.unwrap();

        // Write rows through a plain connection between opens.
        let pool = SqlitePool::connect_with(SqliteConnectOptions::new().filename(key.as_path())).await.unwrap();
        sqlx::query("INSERT INTO cards (due) VALUES (1), (2)").execute(&pool).await.unwrap();
        pool.close().await;
        let reopened = store.open(&key, false, false).await.unwrap();
        assert_eq!(reopened.card_count().await.unwrap(), 2);
        reopened.close(true).await.unwrap();
    }
}
