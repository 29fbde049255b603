//! In-memory store.

use std::sync::Mutex;

use async_trait::async_trait;
use moka::sync::Cache;

use super::{KvStore, entry_size};
use crate::{HuginnError, Result};

/// Thread-safe in-memory [`KvStore`].
///
/// Backed by an unbounded moka cache: entries are never evicted behind
/// the caller's back, so capacity pressure is reported through
/// [`HuginnError::StorageFull`] exactly like a browser's storage quota.
pub struct MemoryStore {
    entries: Cache<String, Vec<u8>>,
    capacity: Option<usize>,
    // Serialises quota check + insert.
    write_lock: Mutex<()>,
}

impl MemoryStore {
    /// Create an unbounded store.
    pub fn new() -> Self {
        Self {
            entries: Cache::builder().build(),
            capacity: None,
            write_lock: Mutex::new(()),
        }
    }

    /// Create a store that rejects writes beyond `bytes` (keys + values).
    pub fn with_capacity(bytes: usize) -> Self {
        Self {
            capacity: Some(bytes),
            ..Self::new()
        }
    }

    /// Bytes currently held (keys + values).
    pub fn used_bytes(&self) -> usize {
        self.entries
            .iter()
            .map(|(k, v)| entry_size(&k, &v))
            .sum()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.iter().count()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.get(key))
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| HuginnError::Storage("memory store lock poisoned".into()))?;

        if let Some(capacity) = self.capacity {
            let replaced = self
                .entries
                .get(key)
                .map(|old| entry_size(key, &old))
                .unwrap_or(0);
            let needed = entry_size(key, &value);
            if self.used_bytes() - replaced + needed > capacity {
                return Err(HuginnError::StorageFull { needed, capacity });
            }
        }

        self.entries.insert(key.to_owned(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.invalidate(key);
        Ok(())
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .entries
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| (*k).clone())
            .collect())
    }
}
