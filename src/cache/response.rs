//! Persistent response cache with in-flight deduplication.
//!
//! [`ResponseCache::get_or_compute`] is the single entry point for any
//! AI-backed computation:
//!
//! 1. Build the request's [`CacheKey`](super::CacheKey).
//! 2. A valid entry (younger than the TTL *and* written in the current
//!    session epoch) is returned without computing.
//! 3. Otherwise, if a computation for the same key is already in flight,
//!    the caller awaits that computation's outcome.
//! 4. Otherwise a new computation is registered, run, its result stored
//!    (unless empty), the in-flight entry removed, and the value returned.
//!
//! # Session epochs
//!
//! Opening a cache starts a new session: the epoch is set to "now", strictly
//! after any previously persisted epoch and after the newest entry's
//! `created_at`, and written to the store. A wall clock that stepped back
//! across a restart therefore cannot revive the previous session's entries.
//! Entries are stamped no earlier than the current epoch.
//! Entries created before the epoch are invalid even if their TTL has not
//! run out. Nothing is deleted eagerly; stale entries are removed when a
//! read encounters them or when a full store forces a sweep. Long-running
//! processes call [`advance_epoch`](ResponseCache::advance_epoch) to start
//! a new generation explicitly. With [`CacheConfig::resume_session`] a
//! restarted process keeps the persisted epoch instead.
//!
//! # Deduplication and cancellation
//!
//! The owner of a new in-flight entry checks the store once more before
//! computing, so a caller whose first lookup raced with another caller's
//! write is served that write instead of computing again.
//!
//! Computations run on their own spawned task. Every caller holds a clone
//! of one shared future, so a caller that gives up does not cancel the
//! computation: it still finishes and populates the cache for the next
//! reader. The in-flight entry is removed when the computation settles,
//! success or failure, even if it panics.
//!
//! # Storage pressure
//!
//! A write rejected with [`HuginnError::StorageFull`] triggers a sweep of
//! invalid entries (oldest first) and one retry. If that fails too, the
//! result is still returned to callers, just not cached.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::key::CacheRequest;
use crate::clock::Clock;
use crate::store::KvStore;
use crate::telemetry;
use crate::{HuginnError, Result};

/// Store key suffix holding the persisted session epoch.
const EPOCH_KEY: &str = "__session_epoch";

/// Configuration for the response cache.
///
/// ```rust
/// # use huginn::CacheConfig;
/// # use std::time::Duration;
/// let config = CacheConfig::new()
///     .ttl(Duration::from_secs(6 * 3600))
///     .key_prefix("dashboard:");
/// ```
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Time-to-live for cached entries. Default: 24 hours.
    pub ttl: Duration,
    /// Prefix for every store key this cache owns. Default: `"huginn:"`.
    pub key_prefix: String,
    /// Keep the persisted session epoch across restarts. Default: false.
    pub resume_session: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(24 * 3600),
            key_prefix: "huginn:".to_string(),
            resume_session: false,
        }
    }
}

impl CacheConfig {
    /// Create a new config with sensible defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the time-to-live for cached entries.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Set the store key prefix.
    pub fn key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Keep the persisted session epoch instead of starting a new one.
    pub fn resume_session(mut self, resume: bool) -> Self {
        self.resume_session = resume;
        self
    }
}

/// What the store holds per key.
#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry<T> {
    key: String,
    payload: T,
    created_at: u64,
}

/// Just enough of an entry to judge validity.
#[derive(Deserialize)]
struct EntryMeta {
    created_at: u64,
}

/// How [`ResponseCache::resolve`] obtained its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// A valid entry was already stored.
    Cached,
    /// Another caller's in-flight computation produced it.
    Joined,
    /// This caller's `compute` ran.
    Computed,
}

type Outcome = std::result::Result<(serde_json::Value, Origin), HuginnError>;

struct InFlight {
    id: u64,
    outcome: Shared<BoxFuture<'static, Outcome>>,
}

struct CacheInner {
    store: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    config: CacheConfig,
    epoch: AtomicU64,
    in_flight: Mutex<HashMap<String, InFlight>>,
    next_id: AtomicU64,
}

impl CacheInner {
    fn storage_key(&self, key: &str) -> String {
        format!("{}{key}", self.config.key_prefix)
    }

    fn epoch_key(&self) -> String {
        self.storage_key(EPOCH_KEY)
    }

    fn is_valid(&self, created_at: u64) -> bool {
        let now = self.clock.now_ms();
        let ttl_ms = self.config.ttl.as_millis() as u64;
        now.saturating_sub(created_at) < ttl_ms && created_at >= self.epoch.load(Ordering::SeqCst)
    }

    /// Read a valid entry; stale or unreadable entries are deleted.
    async fn lookup<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let storage_key = self.storage_key(key);
        let bytes = match self.store.get(&storage_key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                warn!(key = %key, error = %e, "cache read failed");
                return None;
            }
        };

        let fresh = serde_json::from_slice::<EntryMeta>(&bytes)
            .map(|meta| self.is_valid(meta.created_at))
            .unwrap_or(false);
        if !fresh {
            debug!(key = %key, "evicting stale cache entry");
            if let Err(e) = self.store.delete(&storage_key).await {
                warn!(key = %key, error = %e, "failed to evict stale cache entry");
            }
            return None;
        }

        match serde_json::from_slice::<CacheEntry<T>>(&bytes) {
            Ok(entry) => Some(entry.payload),
            Err(e) => {
                // Shape changed without a VERSION bump; next write replaces it
                debug!(key = %key, error = %e, "cached payload does not match requested type");
                None
            }
        }
    }

    /// Store a computed value, sweeping once if the store is full.
    async fn store_value(&self, key: &str, value: &serde_json::Value) {
        if is_empty_payload(value) {
            debug!(key, "empty result, not caching");
            return;
        }

        let entry = CacheEntry {
            key: key.to_string(),
            payload: value,
            created_at: self.clock.now_ms().max(self.epoch.load(Ordering::SeqCst)),
        };
        let bytes = match serde_json::to_vec(&entry) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(key, error = %e, "failed to encode cache entry");
                return;
            }
        };

        let storage_key = self.storage_key(key);
        match self.store.set(&storage_key, bytes.clone()).await {
            Ok(()) => {}
            Err(e) if e.is_storage_full() => {
                metrics::counter!(telemetry::CACHE_SWEEPS_TOTAL).increment(1);
                let removed = self.sweep().await.unwrap_or_else(|e| {
                    warn!(error = %e, "cache sweep failed");
                    0
                });
                debug!(key, removed, "swept cache after storage full");
                if let Err(e) = self.store.set(&storage_key, bytes).await {
                    metrics::counter!(telemetry::CACHE_WRITE_FAILURES_TOTAL).increment(1);
                    warn!(key, error = %e, "cache write failed after sweep, result not cached");
                }
            }
            Err(e) => {
                metrics::counter!(telemetry::CACHE_WRITE_FAILURES_TOTAL).increment(1);
                warn!(key, error = %e, "cache write failed, result not cached");
            }
        }
    }

    /// Newest `created_at` among this cache's entries.
    async fn latest_created_at(&self) -> Result<Option<u64>> {
        let epoch_key = self.epoch_key();
        let mut latest = None;
        for storage_key in self.store.keys(&self.config.key_prefix).await? {
            if storage_key == epoch_key {
                continue;
            }
            let Some(bytes) = self.store.get(&storage_key).await? else {
                continue;
            };
            if let Ok(meta) = serde_json::from_slice::<EntryMeta>(&bytes) {
                latest = latest.max(Some(meta.created_at));
            }
        }
        Ok(latest)
    }

    /// Epoch for a new session: now, but strictly after `previous` and
    /// every stored entry.
    async fn next_epoch(&self, previous: Option<u64>) -> Result<u64> {
        let floor = previous
            .into_iter()
            .chain(self.latest_created_at().await?)
            .max()
            .map_or(0, |t| t + 1);
        Ok(self.clock.now_ms().max(floor))
    }

    /// Delete invalid entries, oldest first. Returns how many were removed.
    async fn sweep(&self) -> Result<usize> {
        let epoch_key = self.epoch_key();
        let mut stale = Vec::new();
        for storage_key in self.store.keys(&self.config.key_prefix).await? {
            if storage_key == epoch_key {
                continue;
            }
            let Some(bytes) = self.store.get(&storage_key).await? else {
                continue;
            };
            match serde_json::from_slice::<EntryMeta>(&bytes) {
                Ok(meta) if self.is_valid(meta.created_at) => {}
                Ok(meta) => stale.push((meta.created_at, storage_key)),
                Err(_) => stale.push((0, storage_key)),
            }
        }

        stale.sort_by_key(|(created_at, _)| *created_at);
        for (_, storage_key) in &stale {
            self.store.delete(storage_key).await?;
        }
        Ok(stale.len())
    }

    /// Remove the in-flight entry, but only if it is still ours.
    fn settle(&self, key: &str, id: u64) {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if in_flight.get(key).is_some_and(|f| f.id == id) {
            in_flight.remove(key);
        }
    }
}

/// Settles the in-flight entry when the computation ends, including by panic.
struct SettleGuard {
    inner: Arc<CacheInner>,
    key: String,
    id: u64,
}

impl Drop for SettleGuard {
    fn drop(&mut self) {
        self.inner.settle(&self.key, self.id);
    }
}

/// `null`, blank strings and empty collections are never cached.
fn is_empty_payload(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Null => true,
        serde_json::Value::String(s) => s.trim().is_empty(),
        serde_json::Value::Array(a) => a.is_empty(),
        serde_json::Value::Object(o) => o.is_empty(),
        _ => false,
    }
}

/// Response cache with TTL, session-epoch invalidation and in-flight
/// deduplication. See the module docs for semantics.
///
/// Cheap to clone; clones share the store, epoch and in-flight map.
#[derive(Clone)]
pub struct ResponseCache {
    inner: Arc<CacheInner>,
}

impl ResponseCache {
    /// Open a cache over `store` and start (or resume) a session.
    pub async fn open(
        store: Arc<dyn KvStore>,
        clock: Arc<dyn Clock>,
        config: CacheConfig,
    ) -> Result<Self> {
        let inner = CacheInner {
            store,
            clock,
            config,
            epoch: AtomicU64::new(0),
            in_flight: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        };

        let epoch_key = inner.epoch_key();
        let persisted = match inner.store.get(&epoch_key).await? {
            Some(bytes) => serde_json::from_slice::<u64>(&bytes).ok(),
            None => None,
        };

        let epoch = match persisted {
            Some(epoch) if inner.config.resume_session => epoch,
            _ => inner.next_epoch(persisted).await?,
        };
        inner.epoch.store(epoch, Ordering::SeqCst);
        if persisted != Some(epoch) {
            inner
                .store
                .set(&epoch_key, serde_json::to_vec(&epoch)?)
                .await?;
        }
        debug!(epoch, resumed = persisted == Some(epoch), "cache session started");

        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Current session epoch (ms since the Unix epoch).
    pub fn epoch(&self) -> u64 {
        self.inner.epoch.load(Ordering::SeqCst)
    }

    /// Start a new session: every existing entry becomes invalid.
    pub async fn advance_epoch(&self) -> Result<u64> {
        let previous = self.epoch();
        let epoch = self.inner.next_epoch(Some(previous)).await?;
        self.inner
            .store
            .set(&self.inner.epoch_key(), serde_json::to_vec(&epoch)?)
            .await?;
        self.inner.epoch.store(epoch, Ordering::SeqCst);
        debug!(previous, epoch, "cache epoch advanced");
        Ok(epoch)
    }

    /// Number of computations currently in flight.
    pub fn in_flight(&self) -> usize {
        self.inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Look up a valid cached value without computing.
    pub async fn get<R, T>(&self, request: &R) -> Result<Option<T>>
    where
        R: CacheRequest,
        T: DeserializeOwned,
    {
        let key = request.cache_key()?;
        Ok(self.inner.lookup(key.as_str()).await)
    }

    /// Return the cached value for `request`, or compute it once.
    ///
    /// Concurrent callers with the same key share a single `compute`
    /// invocation and all receive its outcome. Errors are not cached.
    /// An invalid key fails immediately with [`HuginnError::InvalidKey`].
    pub async fn get_or_compute<R, T, F, Fut>(&self, request: &R, compute: F) -> Result<T>
    where
        R: CacheRequest,
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        self.resolve(request, compute).await.map(|(value, _)| value)
    }

    /// [`get_or_compute`](Self::get_or_compute), also reporting where the
    /// value came from.
    pub async fn resolve<R, T, F, Fut>(&self, request: &R, compute: F) -> Result<(T, Origin)>
    where
        R: CacheRequest,
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let key = request.cache_key()?;
        let function = R::FUNCTION;

        if let Some(hit) = self.inner.lookup::<T>(key.as_str()).await {
            metrics::counter!(telemetry::CACHE_HITS_TOTAL, "function" => function).increment(1);
            debug!(key = %key, "cache hit");
            return Ok((hit, Origin::Cached));
        }

        let (outcome, joined) = {
            let mut in_flight = self
                .inner
                .in_flight
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            match in_flight.get(key.as_str()) {
                Some(existing) => (existing.outcome.clone(), true),
                None => {
                    let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
                    let outcome = self.spawn_compute(key.to_string(), id, compute);
                    in_flight.insert(
                        key.to_string(),
                        InFlight {
                            id,
                            outcome: outcome.clone(),
                        },
                    );
                    (outcome, false)
                }
            }
        };

        if joined {
            metrics::counter!(telemetry::CACHE_DEDUP_JOINS_TOTAL, "function" => function)
                .increment(1);
            debug!(key = %key, "joined in-flight computation");
        } else {
            metrics::counter!(telemetry::CACHE_MISSES_TOTAL, "function" => function).increment(1);
            debug!(key = %key, "cache miss, computing");
        }

        let (value, origin) = outcome.await?;
        let origin = match origin {
            Origin::Computed if joined => Origin::Joined,
            origin => origin,
        };
        Ok((serde_json::from_value(value)?, origin))
    }

    fn spawn_compute<T, F, Fut>(
        &self,
        key: String,
        id: u64,
        compute: F,
    ) -> Shared<BoxFuture<'static, Outcome>>
    where
        T: Serialize + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let inner = self.inner.clone();
        let handle = tokio::spawn(async move {
            let guard = SettleGuard {
                inner: inner.clone(),
                key,
                id,
            };
            // An entry written between the caller's lookup and this task
            // owning the key
            if let Some(value) = inner.lookup::<serde_json::Value>(&guard.key).await {
                debug!(key = %guard.key, "entry appeared before computing");
                drop(guard);
                return Ok((value, Origin::Cached));
            }
            let outcome: Outcome = match compute().await {
                Ok(value) => serde_json::to_value(&value)
                    .map(|value| (value, Origin::Computed))
                    .map_err(HuginnError::from),
                Err(e) => Err(e),
            };
            if let Ok((ref value, _)) = outcome {
                inner.store_value(&guard.key, value).await;
            }
            drop(guard);
            outcome
        });

        async move {
            handle.await.unwrap_or_else(|e| {
                Err(HuginnError::Upstream(format!("cached computation failed: {e}")))
            })
        }
        .boxed()
        .shared()
    }

    /// Remove `request`'s entry, if any.
    pub async fn invalidate<R: CacheRequest>(&self, request: &R) -> Result<()> {
        let key = request.cache_key()?;
        self.inner
            .store
            .delete(&self.inner.storage_key(key.as_str()))
            .await
    }

    /// Delete invalid entries now (oldest first). Returns how many.
    pub async fn sweep(&self) -> Result<usize> {
        self.inner.sweep().await
    }

    /// Delete every entry this cache owns. The session epoch is kept.
    pub async fn clear(&self) -> Result<usize> {
        let epoch_key = self.inner.epoch_key();
        let mut removed = 0;
        for storage_key in self.inner.store.keys(&self.inner.config.key_prefix).await? {
            if storage_key == epoch_key {
                continue;
            }
            self.inner.store.delete(&storage_key).await?;
            removed += 1;
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_payloads() {
        assert!(is_empty_payload(&json!(null)));
        assert!(is_empty_payload(&json!("  ")));
        assert!(is_empty_payload(&json!([])));
        assert!(is_empty_payload(&json!({})));
        assert!(!is_empty_payload(&json!("text")));
        assert!(!is_empty_payload(&json!(0)));
        assert!(!is_empty_payload(&json!(false)));
        assert!(!is_empty_payload(&json!({"a": 1})));
    }

    #[test]
    fn config_defaults() {
        let config = CacheConfig::default();
        assert_eq!(config.ttl, Duration::from_secs(86_400));
        assert_eq!(config.key_prefix, "huginn:");
        assert!(!config.resume_session);
    }
}
