//! Sharded file cache lookups and per-file metadata storage.
//!
//! This crate provides:
//! - Shard routing from storage ids, with one database connection per shard
//! - Table-scoped queries limited to the file cache tables
//! - File id resolution through a node-local location cache, falling back
//!   to a scan of every shard
//! - JSON metadata per file, updated under an optimistic sync token
//! - Transactions on the shard owning a storage

pub mod error;
pub mod files_metadata;
pub mod local_cache;
pub mod models;
pub mod query;
pub mod repos;
pub mod resolver;
pub mod shard;
pub mod store;
pub mod sync_token;

pub use error::{MetadataError, MetadataResult};
pub use local_cache::{LocalCache, LocalCacheFactory, LocationCache, MemoryCacheFactory};
pub use models::{CacheEntry, FilesMetadata};
pub use query::ScopedQuery;
pub use repos::{FileCacheRepo, FilesMetadataRepo, ShardTransactions};
pub use shard::{ModuloShardRouter, ShardConnection, ShardRouter, SingleShardRouter};
pub use store::{FileCacheStore, SqliteStore};

use filecache_core::config::AppConfig;
use std::sync::Arc;

/// Create a file cache store from configuration.
pub async fn from_config(config: &AppConfig) -> MetadataResult<Arc<dyn FileCacheStore>> {
    let store = SqliteStore::new(config).await?;
    Ok(Arc::new(store) as Arc<dyn FileCacheStore>)
}
