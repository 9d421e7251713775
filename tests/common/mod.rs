//! Shared test support: a trivial in-memory storage adapter exercising
//! the adapter contract from the consumer side.

#![allow(dead_code)]

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use gensrv::persistence::{PersistedState, StorageAdapter, StorageError};

/// HashMap-backed adapter. Cheap clones of stored snapshots, no I/O.
#[derive(Default)]
pub struct MemoryAdapter {
    entries: Mutex<HashMap<String, PersistedState>>,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Direct peek for assertions.
    pub fn peek(&self, key: &str) -> Option<PersistedState> {
        self.entries.lock().get(key).cloned()
    }

    /// Direct poke for seeding fixtures.
    pub fn poke(&self, key: &str, state: PersistedState) {
        self.entries.lock().insert(key.to_string(), state);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

#[async_trait]
impl StorageAdapter for MemoryAdapter {
    async fn save(&self, key: &str, state: PersistedState) -> Result<(), StorageError> {
        self.entries.lock().insert(key.to_string(), state);
        Ok(())
    }

    async fn load(&self, key: &str) -> Result<Option<PersistedState>, StorageError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.entries.lock().remove(key).is_some())
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.entries.lock().contains_key(key))
    }

    async fn list_keys(&self, prefix: Option<&str>) -> Result<Vec<String>, StorageError> {
        let entries = self.entries.lock();
        Ok(entries
            .keys()
            .filter(|key| prefix.is_none_or(|p| key.starts_with(p)))
            .cloned()
            .collect())
    }
}
