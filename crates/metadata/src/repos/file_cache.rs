//! File location lookups across shards.

use crate::error::MetadataResult;
use crate::models::CacheEntry;
use async_trait::async_trait;
use filecache_core::{FileId, ShardId};
use std::collections::HashMap;

/// Repository resolving file ids to their file cache entries.
#[async_trait]
pub trait FileCacheRepo: Send + Sync {
    /// Find a file's cache entry, wherever its shard is.
    ///
    /// Tries the shard remembered in the location cache first, then scans all
    /// shards in order. Returns `None` if no shard holds the file.
    async fn get_by_file_id(&self, file_id: FileId) -> MetadataResult<Option<CacheEntry>>;

    /// Batched [`get_by_file_id`](Self::get_by_file_id). Ids that do not
    /// exist are absent from the result.
    async fn get_by_file_ids(
        &self,
        file_ids: &[FileId],
    ) -> MetadataResult<HashMap<FileId, CacheEntry>>;

    /// Entries for the given ids that live on one shard.
    async fn query_by_file_ids_in_shard(
        &self,
        shard: ShardId,
        file_ids: &[FileId],
    ) -> MetadataResult<HashMap<FileId, CacheEntry>>;
}
