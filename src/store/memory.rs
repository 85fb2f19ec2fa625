// src/store/memory.rs

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{KvStore, StoreError};

/// In-memory store. Contents are lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate a key (e.g. to simulate a flag set by an earlier boot).
    pub fn with_entry(self, key: &str, value: &str) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&self, key: &str, value: &str) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(key.to_string(), value.to_string());
    }

    pub fn value_of(&self, key: &str) -> Option<String> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.get(key).cloned()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.value_of(key))
    }

    async fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.insert(key, value);
        Ok(())
    }
}
