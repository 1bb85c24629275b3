//! Degraded store used when the database cannot be opened

use super::BlockListStore;
use snippets_common::Completion;
use tracing::trace;

/// Accepts every mutation and remembers nothing
///
/// Mutations still complete (on a later scheduler turn) so callers that
/// chain on them behave exactly as with a durable store.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopStore;

impl BlockListStore for NoopStore {
    fn get(&self, _key: &str) -> Option<String> {
        None
    }

    fn set(&self, key: &str, _value: &str) -> Completion {
        trace!(key = key, "Discarding write to no-op store");
        Completion::next_tick()
    }

    fn delete(&self, _key: &str) -> Completion {
        Completion::next_tick()
    }

    fn clear(&self) -> Completion {
        Completion::next_tick()
    }

    fn size(&self) -> usize {
        0
    }

    fn keys(&self) -> Vec<String> {
        Vec::new()
    }

    fn is_durable(&self) -> bool {
        false
    }
}
