//! Legacy key-value slot
//!
//! Environments without transactional storage kept the whole block list as
//! one JSON array under the `blockList` key of a flat key-value file. The
//! durable store imports it once and then drops the key.

use super::StoreError;
use crate::model::BlockId;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const BLOCK_LIST_KEY: &str = "blockList";

pub struct LegacySlot {
    path: PathBuf,
}

impl LegacySlot {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the legacy block list, most recent first
    ///
    /// A missing file reads as empty. Numeric ids are rendered as decimal
    /// strings; other non-string entries are skipped.
    pub fn take_block_list(&self) -> Result<Vec<BlockId>, StoreError> {
        let Some(slot) = self.read()? else {
            return Ok(Vec::new());
        };

        let ids = match slot.get(BLOCK_LIST_KEY) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|item| match item {
                    Value::String(s) if !s.is_empty() => Some(BlockId::new(s.clone())),
                    Value::Number(n) => Some(BlockId::new(n.to_string())),
                    other => {
                        debug!(entry = %other, "Skipping unusable legacy block list entry");
                        None
                    }
                })
                .collect(),
            Some(other) => {
                warn!(value = %other, "Legacy blockList is not an array; ignoring");
                Vec::new()
            }
            None => Vec::new(),
        };
        Ok(ids)
    }

    /// Drop the `blockList` key, removing the file once nothing else is left
    pub fn clear(&self) -> Result<(), StoreError> {
        let Some(mut slot) = self.read()? else {
            return Ok(());
        };
        if slot.remove(BLOCK_LIST_KEY).is_none() {
            return Ok(());
        }

        if slot.is_empty() {
            std::fs::remove_file(&self.path).map_err(|e| StoreError::Legacy(e.to_string()))?;
        } else {
            let json = serde_json::to_string_pretty(&Value::Object(slot))
                .map_err(|e| StoreError::Legacy(e.to_string()))?;
            std::fs::write(&self.path, json).map_err(|e| StoreError::Legacy(e.to_string()))?;
        }
        Ok(())
    }

    fn read(&self) -> Result<Option<Map<String, Value>>, StoreError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::Legacy(e.to_string())),
        };
        match serde_json::from_str::<Value>(&content) {
            Ok(Value::Object(map)) => Ok(Some(map)),
            Ok(_) | Err(_) => {
                warn!(path = %self.path.display(), "Legacy slot is not a JSON object; ignoring");
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_slot_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let slot = LegacySlot::new(dir.path().join("absent.json"));
        assert!(slot.take_block_list().unwrap().is_empty());
        assert!(slot.clear().is_ok());
    }

    #[test]
    fn test_numbers_coerced_to_strings() {
        let dir = tempfile::tempdir().unwrap();
        let slot = LegacySlot::new(dir.path().join("slot.json"));
        std::fs::write(slot.path(), r#"{"blockList": [12, "camp", null, ""]}"#).unwrap();

        let ids = slot.take_block_list().unwrap();
        assert_eq!(ids, vec![BlockId::new("12"), BlockId::new("camp")]);
    }

    #[test]
    fn test_clear_keeps_other_keys() {
        let dir = tempfile::tempdir().unwrap();
        let slot = LegacySlot::new(dir.path().join("slot.json"));
        std::fs::write(slot.path(), r#"{"blockList": ["a"], "geoCountry": "fr"}"#).unwrap();

        slot.clear().unwrap();
        let remaining: Value =
            serde_json::from_str(&std::fs::read_to_string(slot.path()).unwrap()).unwrap();
        assert_eq!(remaining, serde_json::json!({"geoCountry": "fr"}));
        assert!(slot.take_block_list().unwrap().is_empty());
    }

    #[test]
    fn test_clear_removes_file_when_empty() {
        let dir = tempfile::tempdir().unwrap();
        let slot = LegacySlot::new(dir.path().join("slot.json"));
        std::fs::write(slot.path(), r#"{"blockList": ["a"]}"#).unwrap();

        slot.clear().unwrap();
        assert!(!slot.path().exists());
    }

    #[test]
    fn test_garbage_slot_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let slot = LegacySlot::new(dir.path().join("slot.json"));
        std::fs::write(slot.path(), "[1, 2, 3]").unwrap();
        assert!(slot.take_block_list().unwrap().is_empty());
    }
}
