//! In-memory cursor store for testing.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use geosync_common::{Error, Result};

use crate::cursor::CursorStore;

/// In-memory cursor store.
///
/// Useful for testing and development. All cursors are lost on drop.
#[derive(Clone, Default)]
pub struct MemoryCursorStore {
    cursors: Arc<RwLock<BTreeMap<String, String>>>,
}

impl MemoryCursorStore {
    /// Create a new empty memory cursor store.
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: T) -> Error {
    Error::Storage("cursor map lock poisoned".to_string())
}

impl CursorStore for MemoryCursorStore {
    fn cursor_for_key(&self, key: &str) -> Result<Option<String>> {
        Ok(self.cursors.read().map_err(poisoned)?.get(key).cloned())
    }

    fn set_cursor_for_key(&self, key: &str, cursor: &str) -> Result<()> {
        self.cursors
            .write()
            .map_err(poisoned)?
            .insert(key.to_string(), cursor.to_string());
        Ok(())
    }

    fn clear_all(&self) -> Result<()> {
        self.cursors.write().map_err(poisoned)?.clear();
        Ok(())
    }

    fn entries(&self) -> Result<Vec<(String, String)>> {
        Ok(self
            .cursors
            .read()
            .map_err(poisoned)?
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}
