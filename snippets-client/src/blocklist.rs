//! Dismissed-snippet list
//!
//! Thin layer over a [`BlockListStore`] that speaks in [`BlockId`]s. Entries
//! carry the time they were blocked; only their presence matters.

use crate::model::BlockId;
use crate::store::BlockListStore;
use snippets_common::{time, Completion};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::info;

#[derive(Clone)]
pub struct BlockList {
    store: Arc<dyn BlockListStore>,
}

impl BlockList {
    pub fn new(store: Arc<dyn BlockListStore>) -> Self {
        Self { store }
    }

    /// Add `id`; blocking an id twice changes nothing
    pub fn block(&self, id: &BlockId) -> Completion {
        if self.store.has(id.as_str()) {
            return Completion::next_tick();
        }
        info!(block_id = %id, "Blocking snippet");
        self.store.set(id.as_str(), &time::now().to_rfc3339())
    }

    /// Remove `id` if present
    pub fn unblock(&self, id: &BlockId) -> Completion {
        if !self.store.has(id.as_str()) {
            return Completion::next_tick();
        }
        info!(block_id = %id, "Unblocking snippet");
        self.store.delete(id.as_str())
    }

    pub fn is_blocked(&self, id: &BlockId) -> bool {
        self.store.has(id.as_str())
    }

    /// Blocked ids, most recently blocked first
    pub fn ids(&self) -> Vec<BlockId> {
        self.store.keys().into_iter().map(BlockId::from).collect()
    }

    /// Set view for selection
    pub fn id_set(&self) -> HashSet<BlockId> {
        self.store.keys().into_iter().map(BlockId::from).collect()
    }

    pub fn clear(&self) -> Completion {
        self.store.clear()
    }

    pub fn len(&self) -> usize {
        self.store.size()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_durable(&self) -> bool {
        self.store.is_durable()
    }
}
