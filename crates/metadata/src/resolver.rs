//! File location resolution and shard transactions for [`SqliteStore`].

use crate::error::MetadataResult;
use crate::models::{CacheEntry, FileCacheRow};
use crate::repos::{FileCacheRepo, ShardTransactions};
use crate::store::{FileCacheStore, SqliteStore};
use async_trait::async_trait;
use filecache_core::{FileId, ShardId, StorageId};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

impl SqliteStore {
    async fn query_by_file_id_in_shard(
        &self,
        file_id: FileId,
        shard: ShardId,
    ) -> MetadataResult<Option<CacheEntry>> {
        let row = self
            .query_for_shard(shard)?
            .select_file_cache()?
            .where_int_eq("f.fileid", file_id.get())
            .fetch_optional::<FileCacheRow>()
            .await?;
        row.map(CacheEntry::try_from).transpose()
    }

    /// Group file ids by the shard their cached storage maps to. Ids without a
    /// cache entry are left out.
    fn cached_shards_for_file_ids(&self, file_ids: &[FileId]) -> BTreeMap<ShardId, Vec<FileId>> {
        let mut result: BTreeMap<ShardId, Vec<FileId>> = BTreeMap::new();
        for &file_id in file_ids {
            if let Some(storage_id) = self.location_cache.get(file_id) {
                result
                    .entry(self.router.shard_for(storage_id))
                    .or_default()
                    .push(file_id);
            }
        }
        result
    }
}

#[async_trait]
impl FileCacheRepo for SqliteStore {
    async fn get_by_file_id(&self, file_id: FileId) -> MetadataResult<Option<CacheEntry>> {
        if let Some(storage_id) = self.location_cache.get(file_id) {
            let shard = self.router.shard_for(storage_id);
            if let Some(entry) = self.query_by_file_id_in_shard(file_id, shard).await? {
                if entry.file_id == file_id {
                    return Ok(Some(entry));
                }
            }
            tracing::debug!(
                file_id = %file_id,
                storage_id = %storage_id,
                shard = %shard,
                "Stale location cache entry, scanning all shards"
            );
        }

        for shard in self.router.all_shards() {
            if let Some(entry) = self.query_by_file_id_in_shard(file_id, shard).await? {
                self.location_cache.set(file_id, entry.storage_id);
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }

    async fn get_by_file_ids(
        &self,
        file_ids: &[FileId],
    ) -> MetadataResult<HashMap<FileId, CacheEntry>> {
        let mut found = HashMap::with_capacity(file_ids.len());
        for (shard, ids) in self.cached_shards_for_file_ids(file_ids) {
            found.extend(self.query_by_file_ids_in_shard(shard, &ids).await?);
        }

        let mut remaining: BTreeSet<FileId> = file_ids
            .iter()
            .filter(|id| !found.contains_key(*id))
            .copied()
            .collect();

        if !remaining.is_empty() {
            tracing::debug!(
                requested = file_ids.len(),
                remaining = remaining.len(),
                "Scanning shards for uncached file ids"
            );
            for shard in self.router.all_shards() {
                let ids: Vec<FileId> = remaining.iter().copied().collect();
                let items = self.query_by_file_ids_in_shard(shard, &ids).await?;
                for (file_id, entry) in items {
                    remaining.remove(&file_id);
                    self.location_cache.set(file_id, entry.storage_id);
                    found.entry(file_id).or_insert(entry);
                }

                if remaining.is_empty() {
                    break;
                }
            }
        }

        Ok(found)
    }

    async fn query_by_file_ids_in_shard(
        &self,
        shard: ShardId,
        file_ids: &[FileId],
    ) -> MetadataResult<HashMap<FileId, CacheEntry>> {
        if file_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let ids: Vec<i64> = file_ids.iter().map(|id| id.get()).collect();
        let rows = self
            .query_for_shard(shard)?
            .select_file_cache()?
            .where_int_in("f.fileid", &ids)
            .fetch_all::<FileCacheRow>()
            .await?;

        rows.into_iter()
            .map(|row| CacheEntry::try_from(row).map(|entry| (entry.file_id, entry)))
            .collect()
    }
}

#[async_trait]
impl ShardTransactions for SqliteStore {
    async fn begin_transaction(
        &self,
        storage_id: StorageId,
    ) -> MetadataResult<Arc<dyn FileCacheStore>> {
        let connection = self.connection_for_storage_id(storage_id)?.begin().await?;
        Ok(Arc::new(self.with_connection(connection)) as Arc<dyn FileCacheStore>)
    }

    async fn in_transaction(&self, storage_id: StorageId) -> MetadataResult<bool> {
        Ok(self
            .connection_for_storage_id(storage_id)?
            .in_transaction()
            .await)
    }

    async fn commit(&self, storage_id: StorageId) -> MetadataResult<()> {
        self.connection_for_storage_id(storage_id)?.commit().await
    }

    async fn roll_back(&self, storage_id: StorageId) -> MetadataResult<()> {
        self.connection_for_storage_id(storage_id)?.roll_back().await
    }
}
