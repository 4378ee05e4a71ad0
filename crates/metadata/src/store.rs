//! Combined store trait and the SQLite-backed sharded store.

use crate::error::{MetadataError, MetadataResult};
use crate::local_cache::LocationCache;
use crate::query::ScopedQuery;
use crate::repos::{FileCacheRepo, FilesMetadataRepo, ShardTransactions};
use crate::shard::{ShardConnection, ShardRouter, router_from_config};
use crate::sync_token::{OsRngTokens, SyncTokenGenerator};
use async_trait::async_trait;
use filecache_core::config::{AppConfig, ShardConnectionConfig};
use filecache_core::{ShardId, StorageId};
use std::sync::Arc;

/// Combined file cache store trait.
#[async_trait]
pub trait FileCacheStore: FileCacheRepo + FilesMetadataRepo + ShardTransactions + Send + Sync {
    /// Create missing tables on every shard.
    async fn migrate(&self) -> MetadataResult<()>;

    /// Check connectivity of every shard.
    async fn health_check(&self) -> MetadataResult<()>;
}

/// Sharded store over one SQLite database per shard.
///
/// Metadata rows live on the first shard's connection.
pub struct SqliteStore {
    pub(crate) shards: Vec<Arc<ShardConnection>>,
    pub(crate) router: Arc<dyn ShardRouter>,
    pub(crate) location_cache: LocationCache,
    pub(crate) tokens: Arc<dyn SyncTokenGenerator>,
}

impl SqliteStore {
    /// Open every configured shard and build the store.
    pub async fn new(config: &AppConfig) -> MetadataResult<Self> {
        config.validate()?;
        let router = router_from_config(&config.sharding)?;

        let mut shards = Vec::with_capacity(config.sharding.shards.len());
        for (index, shard_config) in config.sharding.shards.iter().enumerate() {
            let shard = ShardId::from(index as u32);
            let connection = match shard_config {
                ShardConnectionConfig::Sqlite {
                    path,
                    query_timeout_secs,
                } => ShardConnection::open_sqlite(shard, path, *query_timeout_secs).await?,
            };
            shards.push(Arc::new(connection));
        }

        Self::from_parts(
            shards,
            router,
            LocationCache::from_config(&config.location_cache),
            Arc::new(OsRngTokens),
        )
    }

    /// Assemble a store from already opened shards.
    ///
    /// Every shard the router can name must have a connection.
    pub fn from_parts(
        shards: Vec<Arc<ShardConnection>>,
        router: Arc<dyn ShardRouter>,
        location_cache: LocationCache,
        tokens: Arc<dyn SyncTokenGenerator>,
    ) -> MetadataResult<Self> {
        if shards.is_empty() {
            return Err(MetadataError::Config(
                "store requires at least one shard connection".to_string(),
            ));
        }
        if let Some(missing) = router
            .all_shards()
            .into_iter()
            .find(|shard| shard.index() >= shards.len())
        {
            return Err(MetadataError::Config(format!(
                "router names shard {missing} but only {} connections are configured",
                shards.len()
            )));
        }

        tracing::info!(shards = shards.len(), cache = ?location_cache, "File cache store ready");
        Ok(Self {
            shards,
            router,
            location_cache,
            tokens,
        })
    }

    /// The same store with one shard's connection replaced by a transaction
    /// handle for that shard.
    pub(crate) fn with_connection(&self, connection: ShardConnection) -> Self {
        let mut shards = self.shards.clone();
        if let Some(slot) = shards.get_mut(connection.shard().index()) {
            *slot = Arc::new(connection);
        }
        Self {
            shards,
            router: Arc::clone(&self.router),
            location_cache: self.location_cache.clone(),
            tokens: Arc::clone(&self.tokens),
        }
    }

    pub fn shards(&self) -> &[Arc<ShardConnection>] {
        &self.shards
    }

    pub fn router(&self) -> &dyn ShardRouter {
        self.router.as_ref()
    }

    pub fn location_cache(&self) -> &LocationCache {
        &self.location_cache
    }

    pub(crate) fn database_for_shard(&self, shard: ShardId) -> MetadataResult<&ShardConnection> {
        self.shards
            .get(shard.index())
            .map(Arc::as_ref)
            .ok_or(MetadataError::UnknownShard(shard))
    }

    pub(crate) fn connection_for_storage_id(
        &self,
        storage_id: StorageId,
    ) -> MetadataResult<&ShardConnection> {
        self.database_for_shard(self.router.shard_for(storage_id))
    }

    /// Connection holding the `files_metadata` table.
    pub(crate) fn metadata_connection(&self) -> &ShardConnection {
        &self.shards[0]
    }

    /// Scoped query on a shard.
    pub fn query_for_shard(&self, shard: ShardId) -> MetadataResult<ScopedQuery<'_>> {
        Ok(self.database_for_shard(shard)?.query())
    }

    /// Scoped query on the shard owning a storage.
    pub fn query_for_storage_id(&self, storage_id: StorageId) -> MetadataResult<ScopedQuery<'_>> {
        Ok(self.connection_for_storage_id(storage_id)?.query())
    }
}

#[async_trait]
impl FileCacheStore for SqliteStore {
    async fn migrate(&self) -> MetadataResult<()> {
        for shard in &self.shards {
            shard.migrate().await?;
        }
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        for shard in &self.shards {
            shard.health_check().await?;
        }
        Ok(())
    }
}
