//! File-backed store.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use super::{KvStore, entry_size};
use crate::{HuginnError, Result};

/// [`KvStore`] persisted as one JSON object in a file.
///
/// The whole map is held in memory and rewritten (temp file + rename) on
/// every mutation, so a crash never leaves a half-written file behind.
/// Values must be UTF-8; the cache only ever stores JSON text.
pub struct FileStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
    capacity: Option<usize>,
}

impl FileStore {
    /// Open (or create on first write) the store at `path`.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let entries = match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.is_empty() => BTreeMap::new(),
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                HuginnError::Storage(format!("Failed to parse store file {path:?}: {e}"))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                return Err(HuginnError::Storage(format!(
                    "Failed to read store file {path:?}: {e}"
                )));
            }
        };
        debug!(path = %path.display(), entries = entries.len(), "opened file store");
        Ok(Self {
            path,
            entries: Mutex::new(entries),
            capacity: None,
        })
    }

    /// Reject writes that would grow the store beyond `bytes` (keys + values).
    pub fn with_capacity(mut self, bytes: usize) -> Self {
        self.capacity = Some(bytes);
        self
    }

    /// Location of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        let bytes = serde_json::to_vec(entries)?;
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl KvStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let entries = self.entries.lock().await;
        Ok(entries.get(key).map(|v| v.clone().into_bytes()))
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()> {
        let value = String::from_utf8(value)
            .map_err(|_| HuginnError::Storage("FileStore only holds UTF-8 values".into()))?;

        let mut entries = self.entries.lock().await;
        if let Some(capacity) = self.capacity {
            let used: usize = entries
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(k, v)| entry_size(k, v.as_bytes()))
                .sum();
            let needed = entry_size(key, value.as_bytes());
            if used + needed > capacity {
                return Err(HuginnError::StorageFull { needed, capacity });
            }
        }

        let previous = entries.insert(key.to_owned(), value);
        if let Err(e) = self.persist(&entries).await {
            // Keep memory and disk in agreement
            match previous {
                Some(old) => entries.insert(key.to_owned(), old),
                None => entries.remove(key),
            };
            return Err(e);
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.lock().await;
        if entries.remove(key).is_some() {
            self.persist(&entries).await?;
        }
        Ok(())
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        let entries = self.entries.lock().await;
        Ok(entries
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}
