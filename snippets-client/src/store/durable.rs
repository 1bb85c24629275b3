//! SQLite-backed store
//!
//! Every row of `block_list` is mirrored in an in-memory index that is fully
//! loaded before [`DurableStore::open`] returns. Mutations update the index
//! first, then queue the durable write to a single writer task so writes hit
//! the database in the order they were issued.

use super::{BlockListStore, LegacySlot, StoreError};
use snippets_common::completion::CompletionSender;
use snippets_common::{db, Completion};
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Settings flag recording that the legacy slot was already imported
pub(super) const LEGACY_IMPORTED_KEY: &str = "legacy_block_list_imported";

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    seq: i64,
}

#[derive(Default)]
struct Index {
    entries: HashMap<String, Entry>,
    next_seq: i64,
}

enum WriteOp {
    Set {
        key: String,
        value: String,
        seq: i64,
        done: CompletionSender,
    },
    Delete {
        key: String,
        done: CompletionSender,
    },
    Clear {
        done: CompletionSender,
    },
}

/// Durable block-list store
pub struct DurableStore {
    index: RwLock<Index>,
    writes: mpsc::UnboundedSender<WriteOp>,
}

impl DurableStore {
    /// Load every entry into the index and start the writer task
    ///
    /// When `legacy` is given and has not been imported yet, its ids are
    /// merged into the collection first and the slot is cleared.
    pub async fn open(pool: SqlitePool, legacy: Option<&LegacySlot>) -> Result<Self, StoreError> {
        if let Some(slot) = legacy {
            import_legacy(&pool, slot).await?;
        }

        let rows = sqlx::query("SELECT block_id, value, seq FROM block_list")
            .fetch_all(&pool)
            .await?;

        let mut index = Index::default();
        for row in rows {
            let key: String = row.get("block_id");
            let seq: i64 = row.get("seq");
            index.next_seq = index.next_seq.max(seq + 1);
            index.entries.insert(
                key,
                Entry {
                    value: row.get("value"),
                    seq,
                },
            );
        }
        debug!(entries = index.entries.len(), "Block list index loaded");

        let (writes, rx) = mpsc::unbounded_channel();
        tokio::spawn(writer_loop(pool, rx));

        Ok(Self {
            index: RwLock::new(index),
            writes,
        })
    }

    fn read_index(&self) -> RwLockReadGuard<'_, Index> {
        self.index.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_index(&self) -> RwLockWriteGuard<'_, Index> {
        self.index.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn queue(&self, op: WriteOp, completion: Completion) -> Completion {
        if self.writes.send(op).is_err() {
            // The dropped sender inside `op` still resolves the completion
            warn!("Block list writer stopped; change kept in memory only");
        }
        completion
    }
}

impl BlockListStore for DurableStore {
    fn get(&self, key: &str) -> Option<String> {
        self.read_index().entries.get(key).map(|e| e.value.clone())
    }

    fn set(&self, key: &str, value: &str) -> Completion {
        let seq = {
            let mut index = self.write_index();
            let next = index.next_seq;
            let entry = index.entries.entry(key.to_string()).or_insert(Entry {
                value: String::new(),
                seq: next,
            });
            entry.value = value.to_string();
            let seq = entry.seq;
            if seq == next {
                index.next_seq += 1;
            }
            seq
        };

        let (done, completion) = Completion::pair();
        self.queue(
            WriteOp::Set {
                key: key.to_string(),
                value: value.to_string(),
                seq,
                done,
            },
            completion,
        )
    }

    fn delete(&self, key: &str) -> Completion {
        self.write_index().entries.remove(key);
        let (done, completion) = Completion::pair();
        self.queue(
            WriteOp::Delete {
                key: key.to_string(),
                done,
            },
            completion,
        )
    }

    fn clear(&self) -> Completion {
        self.write_index().entries.clear();
        let (done, completion) = Completion::pair();
        self.queue(WriteOp::Clear { done }, completion)
    }

    fn size(&self) -> usize {
        self.read_index().entries.len()
    }

    fn keys(&self) -> Vec<String> {
        let index = self.read_index();
        let mut entries: Vec<(&String, i64)> =
            index.entries.iter().map(|(k, e)| (k, e.seq)).collect();
        entries.sort_by(|a, b| b.1.cmp(&a.1));
        entries.into_iter().map(|(k, _)| k.clone()).collect()
    }

    fn is_durable(&self) -> bool {
        true
    }
}

async fn writer_loop(pool: SqlitePool, mut rx: mpsc::UnboundedReceiver<WriteOp>) {
    while let Some(op) = rx.recv().await {
        match op {
            WriteOp::Set {
                key,
                value,
                seq,
                done,
            } => {
                let result = sqlx::query(
                    "INSERT INTO block_list (block_id, value, seq) VALUES (?, ?, ?)
                     ON CONFLICT(block_id) DO UPDATE SET value = excluded.value",
                )
                .bind(&key)
                .bind(&value)
                .bind(seq)
                .execute(&pool)
                .await;
                if let Err(e) = result {
                    warn!(key = %key, error = %e, "Failed to persist block list entry");
                }
                done.complete();
            }
            WriteOp::Delete { key, done } => {
                let result = sqlx::query("DELETE FROM block_list WHERE block_id = ?")
                    .bind(&key)
                    .execute(&pool)
                    .await;
                if let Err(e) = result {
                    warn!(key = %key, error = %e, "Failed to delete block list entry");
                }
                done.complete();
            }
            WriteOp::Clear { done } => {
                if let Err(e) = sqlx::query("DELETE FROM block_list").execute(&pool).await {
                    warn!(error = %e, "Failed to clear block list");
                }
                done.complete();
            }
        }
    }
    debug!("Block list writer stopped");
}

/// Merge legacy ids once; the legacy list is most recent first
async fn import_legacy(pool: &SqlitePool, slot: &LegacySlot) -> Result<(), StoreError> {
    if db::get_setting(pool, LEGACY_IMPORTED_KEY).await?.is_some() {
        return Ok(());
    }

    // An unreadable slot skips the import; the flag stays unset so a later
    // session can retry
    let ids = match slot.take_block_list() {
        Ok(ids) => ids,
        Err(e) => {
            warn!(path = %slot.path().display(), error = %e, "Legacy slot unreadable; import skipped");
            return Ok(());
        }
    };
    let imported_at = snippets_common::time::now().to_rfc3339();

    let mut tx = pool.begin().await?;
    let base: i64 = sqlx::query_scalar("SELECT COALESCE(MAX(seq), -1) + 1 FROM block_list")
        .fetch_one(&mut *tx)
        .await?;
    let count = ids.len() as i64;
    for (position, id) in ids.iter().enumerate() {
        sqlx::query("INSERT OR IGNORE INTO block_list (block_id, value, seq) VALUES (?, ?, ?)")
            .bind(id.as_str())
            .bind(&imported_at)
            .bind(base + count - 1 - position as i64)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;

    db::set_setting(pool, LEGACY_IMPORTED_KEY, &imported_at).await?;
    if let Err(e) = slot.clear() {
        warn!(path = %slot.path().display(), error = %e, "Failed to clear imported legacy slot");
    }
    if !ids.is_empty() {
        info!(count = ids.len(), "Imported legacy block list");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn open_store(dir: &tempfile::TempDir) -> (DurableStore, SqlitePool) {
        let pool = db::init_database(&dir.path().join("snippets.db")).await.unwrap();
        let store = DurableStore::open(pool.clone(), None).await.unwrap();
        (store, pool)
    }

    #[tokio::test]
    async fn test_set_visible_before_completion() {
        let dir = tempfile::tempdir().unwrap();
        let (store, _pool) = open_store(&dir).await;

        let completion = store.set("spring-sale", "x");
        assert_eq!(store.get("spring-sale").as_deref(), Some("x"));
        assert!(store.has("spring-sale"));

        tokio::time::timeout(Duration::from_secs(5), completion)
            .await
            .expect("write should complete");
    }

    #[tokio::test]
    async fn test_writes_persist_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let (store, pool) = open_store(&dir).await;

        store.set("a", "1").await;
        store.set("b", "2").await;
        store.delete("a").await;
        drop(store);

        let reopened = DurableStore::open(pool, None).await.unwrap();
        assert_eq!(reopened.size(), 1);
        assert_eq!(reopened.get("b").as_deref(), Some("2"));
        assert!(!reopened.has("a"));
    }

    #[tokio::test]
    async fn test_keys_most_recent_first() {
        let dir = tempfile::tempdir().unwrap();
        let (store, pool) = open_store(&dir).await;

        let _ = store.set("first", "");
        let _ = store.set("second", "");
        store.set("third", "").await;
        // Overwriting keeps the original position
        store.set("first", "again").await;
        assert_eq!(store.keys(), vec!["third", "second", "first"]);

        drop(store);
        let reopened = DurableStore::open(pool, None).await.unwrap();
        assert_eq!(reopened.keys(), vec!["third", "second", "first"]);
    }

    #[tokio::test]
    async fn test_clear_empties_index_and_table() {
        let dir = tempfile::tempdir().unwrap();
        let (store, pool) = open_store(&dir).await;

        let _ = store.set("a", "");
        let _ = store.set("b", "");
        let completion = store.clear();
        assert_eq!(store.size(), 0);
        completion.await;

        let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM block_list")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(rows, 0);
    }

    #[tokio::test]
    async fn test_legacy_slot_imported_once() {
        let dir = tempfile::tempdir().unwrap();
        let slot = LegacySlot::new(dir.path().join("legacy_slot.json"));
        std::fs::write(slot.path(), r#"{"blockList": ["newest", 42, "oldest"]}"#).unwrap();

        let pool = db::init_database(&dir.path().join("snippets.db")).await.unwrap();
        let store = DurableStore::open(pool.clone(), Some(&slot)).await.unwrap();
        assert_eq!(store.keys(), vec!["newest", "42", "oldest"]);
        drop(store);

        // Slot content written after the import is not picked up again
        std::fs::write(slot.path(), r#"{"blockList": ["late"]}"#).unwrap();
        let reopened = DurableStore::open(pool, Some(&slot)).await.unwrap();
        assert_eq!(reopened.size(), 3);
        assert!(!reopened.has("late"));
    }
}
