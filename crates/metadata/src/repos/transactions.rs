//! Transactions on the shard owning a storage.

use crate::error::MetadataResult;
use crate::store::FileCacheStore;
use async_trait::async_trait;
use filecache_core::StorageId;
use std::sync::Arc;

/// Transaction control, routed by storage id.
///
/// A transaction covers exactly one shard connection. Work spanning several
/// shards is not atomic.
#[async_trait]
pub trait ShardTransactions: Send + Sync {
    /// Open a transaction on the shard owning `storage_id`.
    ///
    /// Returns a store whose operations on that shard run inside the
    /// transaction; operations on other shards are unaffected. Other callers
    /// of the shard wait until the transaction is committed, rolled back or
    /// dropped, so the caller must not use the original store for the same
    /// shard while it holds the transaction. Dropping the returned store
    /// without committing rolls back.
    async fn begin_transaction(
        &self,
        storage_id: StorageId,
    ) -> MetadataResult<Arc<dyn FileCacheStore>>;

    /// Whether this store owns an open transaction on the shard.
    async fn in_transaction(&self, storage_id: StorageId) -> MetadataResult<bool>;

    async fn commit(&self, storage_id: StorageId) -> MetadataResult<()>;

    async fn roll_back(&self, storage_id: StorageId) -> MetadataResult<()>;
}
