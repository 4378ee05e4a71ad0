//! Test fixtures for the sharded file cache store.

#![allow(dead_code)]

use filecache_core::config::AppConfig;
use filecache_core::{FileId, ShardId, StorageId};
use filecache_metadata::local_cache::{CacheBackendError, LocalCache, MemoryCache};
use filecache_metadata::shard::{ModuloShardRouter, ShardRouter, SingleShardRouter};
use filecache_metadata::sync_token::SyncTokenGenerator;
use filecache_metadata::{LocationCache, MetadataResult, ShardConnection, SqliteStore};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;

/// A store over temporary SQLite shards, removed on drop.
pub struct TestStore {
    pub store: SqliteStore,
    _temp_dir: TempDir,
}

impl TestStore {
    /// Store with `shard_count` shards and the default in-memory location cache.
    pub async fn new(shard_count: usize) -> MetadataResult<Self> {
        init_tracing();
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let paths: Vec<_> = (0..shard_count)
            .map(|i| temp_dir.path().join(format!("shard{i}.db")))
            .collect();
        let store = SqliteStore::new(&AppConfig::for_testing(&paths)).await?;

        Ok(Self {
            store,
            _temp_dir: temp_dir,
        })
    }

    /// Store with `shard_count` shards and a custom location cache backend.
    pub async fn with_cache(
        shard_count: usize,
        cache: Arc<dyn LocalCache>,
    ) -> MetadataResult<Self> {
        init_tracing();
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let mut shards = Vec::with_capacity(shard_count);
        for i in 0..shard_count {
            let path = temp_dir.path().join(format!("shard{i}.db"));
            let conn = ShardConnection::open_sqlite(ShardId::from(i as u32), &path, None).await?;
            shards.push(Arc::new(conn));
        }
        let router: Arc<dyn ShardRouter> = if shard_count > 1 {
            Arc::new(ModuloShardRouter::new(shard_count as u32)?)
        } else {
            Arc::new(SingleShardRouter)
        };
        let store = SqliteStore::from_parts(
            shards,
            router,
            LocationCache::new(cache),
            Arc::new(SequenceTokens::default()),
        )?;

        Ok(Self {
            store,
            _temp_dir: temp_dir,
        })
    }

    pub fn shard(&self, index: usize) -> &ShardConnection {
        &self.store.shards()[index]
    }

    /// Query counts per shard, in shard order.
    pub fn query_counts(&self) -> Vec<u64> {
        self.store
            .shards()
            .iter()
            .map(|shard| shard.query_count())
            .collect()
    }

    /// Insert a file cache row on the shard owning `storage`.
    pub async fn insert_file(&self, file_id: i64, storage: i64, path: &str) {
        self.insert_file_with_etag(file_id, storage, path, &format!("etag-{file_id}"))
            .await;
    }

    pub async fn insert_file_with_etag(&self, file_id: i64, storage: i64, path: &str, etag: &str) {
        let shard = self.store.router().shard_for(StorageId::from(storage));
        let name = path.rsplit('/').next().unwrap_or(path);
        sqlx::query(
            r#"
            INSERT INTO filecache (fileid, storage, path, path_hash, parent, name, size, mtime, etag, permissions)
            VALUES (?, ?, ?, ?, -1, ?, 100, 1700000000, ?, 31)
            "#,
        )
        .bind(file_id)
        .bind(storage)
        .bind(path)
        .bind(path)
        .bind(name)
        .bind(etag)
        .execute(self.shard(shard.index()).pool())
        .await
        .expect("Failed to insert file");
    }

    /// Insert a raw metadata row, bypassing validation.
    pub async fn insert_raw_metadata(&self, file_id: i64, json: &str, sync_token: &str) {
        sqlx::query(
            "INSERT INTO files_metadata (file_id, json, sync_token, last_update) VALUES (?, ?, ?, 1700000000)",
        )
        .bind(file_id)
        .bind(json)
        .bind(sync_token)
        .execute(self.shard(0).pool())
        .await
        .expect("Failed to insert metadata row");
    }
}

pub fn fid(id: i64) -> FileId {
    FileId::new(id).expect("test file ids are positive")
}

pub fn sid(id: i64) -> StorageId {
    StorageId::from(id)
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_test_writer()
        .try_init();
}

/// Predictable sync tokens: `tok0001`, `tok0002`, ...
#[derive(Default)]
pub struct SequenceTokens {
    next: AtomicUsize,
}

impl SyncTokenGenerator for SequenceTokens {
    fn generate(&self) -> String {
        let n = self.next.fetch_add(1, Ordering::SeqCst) + 1;
        format!("tok{n:04}")
    }
}

/// In-memory cache that counts hits and writes.
pub struct RecordingCache {
    inner: MemoryCache,
    pub gets: AtomicUsize,
    pub hits: AtomicUsize,
    pub sets: AtomicUsize,
}

impl RecordingCache {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryCache::new("storage_by_fileid", 1000, None),
            gets: AtomicUsize::new(0),
            hits: AtomicUsize::new(0),
            sets: AtomicUsize::new(0),
        })
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    pub fn sets(&self) -> usize {
        self.sets.load(Ordering::SeqCst)
    }
}

impl LocalCache for RecordingCache {
    fn get(&self, key: &str) -> Result<Option<String>, CacheBackendError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        let value = self.inner.get(key)?;
        if value.is_some() {
            self.hits.fetch_add(1, Ordering::SeqCst);
        }
        Ok(value)
    }

    fn set(&self, key: &str, value: String) -> Result<(), CacheBackendError> {
        self.sets.fetch_add(1, Ordering::SeqCst);
        self.inner.set(key, value)
    }
}

/// Cache backend that is always unavailable.
pub struct UnavailableCache;

impl LocalCache for UnavailableCache {
    fn get(&self, _key: &str) -> Result<Option<String>, CacheBackendError> {
        Err(CacheBackendError("backend offline".to_string()))
    }

    fn set(&self, _key: &str, _value: String) -> Result<(), CacheBackendError> {
        Err(CacheBackendError("backend offline".to_string()))
    }
}
