//! Node-local caches.
//!
//! The location cache remembers which storage a file id was last found on so
//! lookups can skip the shard scan. It is advisory: values may be stale and
//! callers verify every hit against the shard.
//!
//! Cache backends *fail open*. A backend error reads as a miss and a failed
//! write is dropped; the lookup layer never depends on the cache for
//! correctness.

use dashmap::DashMap;
use filecache_core::config::LocationCacheConfig;
use filecache_core::{FileId, StorageId};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Error reported by a cache backend.
#[derive(Debug, Error)]
#[error("cache backend unavailable: {0}")]
pub struct CacheBackendError(pub String);

/// Named, node-local key-value cache.
///
/// No durability or cross-node consistency is expected.
pub trait LocalCache: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, CacheBackendError>;

    fn set(&self, key: &str, value: String) -> Result<(), CacheBackendError>;
}

/// Creates named local caches.
pub trait LocalCacheFactory: Send + Sync {
    fn create_local(&self, name: &str) -> Arc<dyn LocalCache>;
}

/// Factory for in-process [`MemoryCache`]s.
#[derive(Debug, Clone)]
pub struct MemoryCacheFactory {
    capacity: usize,
    ttl: Option<Duration>,
}

impl MemoryCacheFactory {
    pub fn new(capacity: usize, ttl: Option<Duration>) -> Self {
        Self { capacity, ttl }
    }

    pub fn from_config(config: &LocationCacheConfig) -> Self {
        Self::new(config.capacity, config.ttl_secs.map(Duration::from_secs))
    }
}

impl LocalCacheFactory for MemoryCacheFactory {
    fn create_local(&self, name: &str) -> Arc<dyn LocalCache> {
        Arc::new(MemoryCache::new(name, self.capacity, self.ttl))
    }
}

struct MemoryEntry {
    value: String,
    inserted_at: Instant,
    seq: u64,
}

/// Bounded in-process cache with optional expiry.
///
/// When full, expired entries are dropped first, then the oldest tenth of the
/// capacity in one pass.
pub struct MemoryCache {
    prefix: String,
    entries: DashMap<String, MemoryEntry>,
    capacity: usize,
    ttl: Option<Duration>,
    next_seq: AtomicU64,
}

impl MemoryCache {
    pub fn new(name: &str, capacity: usize, ttl: Option<Duration>) -> Self {
        Self {
            prefix: format!("{name}/"),
            entries: DashMap::new(),
            capacity: capacity.max(1),
            ttl,
            next_seq: AtomicU64::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn key(&self, key: &str) -> String {
        format!("{}{key}", self.prefix)
    }

    fn is_expired(&self, entry: &MemoryEntry, now: Instant) -> bool {
        self.ttl
            .is_some_and(|ttl| now.duration_since(entry.inserted_at) >= ttl)
    }

    fn make_room(&self, now: Instant) {
        if self.ttl.is_some() {
            self.entries.retain(|_, entry| !self.is_expired(entry, now));
        }
        if self.entries.len() < self.capacity {
            return;
        }

        let mut by_age: Vec<(u64, String)> = self
            .entries
            .iter()
            .map(|entry| (entry.value().seq, entry.key().clone()))
            .collect();
        let batch = (self.capacity / 10).max(1).min(by_age.len());
        if batch < by_age.len() {
            by_age.select_nth_unstable(batch);
        }
        for (_, key) in by_age.into_iter().take(batch) {
            self.entries.remove(&key);
        }
    }
}

impl LocalCache for MemoryCache {
    fn get(&self, key: &str) -> Result<Option<String>, CacheBackendError> {
        let key = self.key(key);
        let now = Instant::now();
        let value = match self.entries.get(&key) {
            Some(entry) if !self.is_expired(&entry, now) => Some(entry.value.clone()),
            Some(_) => None,
            None => return Ok(None),
        };
        if value.is_none() {
            self.entries
                .remove_if(&key, |_, entry| self.is_expired(entry, now));
        }
        Ok(value)
    }

    fn set(&self, key: &str, value: String) -> Result<(), CacheBackendError> {
        let key = self.key(key);
        let now = Instant::now();
        if !self.entries.contains_key(&key) && self.entries.len() >= self.capacity {
            self.make_room(now);
        }
        self.entries.insert(
            key,
            MemoryEntry {
                value,
                inserted_at: now,
                seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
            },
        );
        Ok(())
    }
}

/// File id to storage id hints.
#[derive(Clone)]
pub struct LocationCache {
    backend: Option<Arc<dyn LocalCache>>,
}

impl LocationCache {
    pub fn new(backend: Arc<dyn LocalCache>) -> Self {
        Self {
            backend: Some(backend),
        }
    }

    /// A cache that never hits.
    pub fn disabled() -> Self {
        Self { backend: None }
    }

    pub fn from_config(config: &LocationCacheConfig) -> Self {
        if !config.enabled {
            return Self::disabled();
        }
        Self::new(MemoryCacheFactory::from_config(config).create_local(&config.name))
    }

    /// Last known storage of a file. Misses, backend errors and unreadable
    /// values all return `None`.
    pub fn get(&self, file_id: FileId) -> Option<StorageId> {
        let backend = self.backend.as_ref()?;
        match backend.get(&file_id.to_string()) {
            Ok(Some(value)) => match value.parse::<i64>() {
                Ok(storage) => Some(StorageId::from(storage)),
                Err(_) => {
                    tracing::warn!(file_id = %file_id, value = %value, "Ignoring unreadable location cache value");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(file_id = %file_id, error = %e, "Location cache read failed, treating as miss");
                None
            }
        }
    }

    /// Remember where a file was found. Failures are logged and dropped.
    pub fn set(&self, file_id: FileId, storage_id: StorageId) {
        let Some(backend) = self.backend.as_ref() else {
            return;
        };
        if let Err(e) = backend.set(&file_id.to_string(), storage_id.to_string()) {
            tracing::warn!(
                file_id = %file_id,
                storage_id = %storage_id,
                error = %e,
                "Location cache write failed"
            );
        }
    }
}

impl std::fmt::Debug for LocationCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocationCache")
            .field("enabled", &self.backend.is_some())
            .finish()
    }
}
