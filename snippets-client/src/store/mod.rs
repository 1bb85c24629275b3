//! Block-list persistence
//!
//! One [`BlockListStore`] contract with two implementations chosen when the
//! session opens: [`DurableStore`] over SQLite, or [`NoopStore`] when the
//! database cannot be opened. Reads are synchronous against an in-memory
//! index; mutations return a [`Completion`] that fires once the durable
//! write has finished (successfully or not).

pub mod durable;
pub mod legacy;
pub mod noop;

pub use durable::DurableStore;
pub use legacy::LegacySlot;
pub use noop::NoopStore;

use snippets_common::{db, ClientConfig, Completion};
use sqlx::SqlitePool;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// Store errors; logged at the boundary, never surfaced to the host
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database could not be opened or initialized
    #[error("Failed to open store: {0}")]
    Open(#[from] snippets_common::Error),

    /// Query against an opened database failed
    #[error("Store query failed: {0}")]
    Query(#[from] sqlx::Error),

    /// Legacy slot could not be read or rewritten
    #[error("Legacy slot error: {0}")]
    Legacy(String),
}

/// Key-value contract behind the block list
pub trait BlockListStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Insert or replace; visible to `get` before this returns
    fn set(&self, key: &str, value: &str) -> Completion;

    fn delete(&self, key: &str) -> Completion;

    fn clear(&self) -> Completion;

    fn size(&self) -> usize;

    /// Keys ordered most recently inserted first
    fn keys(&self) -> Vec<String>;

    /// `false` for the degraded store
    fn is_durable(&self) -> bool;
}

/// Store chosen for the session, plus the database when one is open
pub struct OpenedStore {
    pub store: Arc<dyn BlockListStore>,
    pub pool: Option<SqlitePool>,
}

/// Open the durable store, degrading to [`NoopStore`] on failure
///
/// A database that fails to open is deleted once so the next session can
/// start clean; this session runs without persistence.
pub async fn open_block_store(config: &ClientConfig) -> OpenedStore {
    let db_path = config.database_path();
    let legacy = LegacySlot::new(config.legacy_slot_path());

    match open_durable(&db_path, &legacy).await {
        Ok((store, pool)) => {
            info!(entries = store.size(), "Block list store opened");
            OpenedStore {
                store: Arc::new(store),
                pool: Some(pool),
            }
        }
        Err(e) => {
            warn!(error = %e, path = %db_path.display(), "Block list store unavailable; using no-op store");
            remove_database_files(&db_path);
            OpenedStore {
                store: Arc::new(NoopStore),
                pool: None,
            }
        }
    }
}

async fn open_durable(db_path: &Path, legacy: &LegacySlot) -> Result<(DurableStore, SqlitePool), StoreError> {
    let pool = db::init_database(db_path).await?;
    let store = DurableStore::open(pool.clone(), Some(legacy)).await?;
    Ok((store, pool))
}

fn remove_database_files(db_path: &Path) {
    let mut candidates = vec![db_path.to_path_buf()];
    for suffix in ["-wal", "-shm"] {
        let mut name = db_path.as_os_str().to_os_string();
        name.push(suffix);
        candidates.push(name.into());
    }
    for path in candidates {
        match std::fs::remove_file(&path) {
            Ok(()) => info!(path = %path.display(), "Removed unusable database file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove database file"),
        }
    }
}
