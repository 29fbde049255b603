//! Persistent key-value stores backing the response cache.
//!
//! The cache only needs four operations, so the seam is the small
//! [`KvStore`] trait:
//!
//! - [`MemoryStore`]: in-process, moka-backed; the default for tests and
//!   short-lived processes.
//! - [`FileStore`]: a single JSON file rewritten atomically on every
//!   mutation; survives process restarts.
//!
//! Both accept an optional byte quota. A write that would exceed it fails
//! with [`HuginnError::StorageFull`](crate::HuginnError::StorageFull), which
//! the cache answers by sweeping expired entries and retrying once.

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use async_trait::async_trait;

use crate::Result;

/// Minimal persistent key-value abstraction.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Read a value. `Ok(None)` when the key is absent.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Write (or overwrite) a value.
    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()>;

    /// Remove a value. Removing an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// All keys starting with `prefix`, in no particular order.
    async fn keys(&self, prefix: &str) -> Result<Vec<String>>;
}

/// Bytes a single entry counts against a quota.
pub(crate) fn entry_size(key: &str, value: &[u8]) -> usize {
    key.len() + value.len()
}
