//! Shard routing and per-shard connections.
//!
//! Every storage id is owned by exactly one shard. The [`ShardRouter`] is the
//! only place that knows how storage ids map onto shards; everything else asks
//! it instead of assuming shard 0.

use crate::error::{MetadataError, MetadataResult};
use crate::query::ScopedQuery;
use filecache_core::config::{ShardStrategy, ShardingConfig};
use filecache_core::{ShardId, StorageId};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::{Pool, Sqlite, Transaction};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};

/// Maps storage ids onto shards.
///
/// Implementations must be pure: the same storage id always yields the same
/// shard and `all_shards` always lists shards in the same order.
pub trait ShardRouter: Send + Sync {
    /// Shard owning the given storage.
    fn shard_for(&self, storage_id: StorageId) -> ShardId;

    /// All shards, in fallback scan order.
    fn all_shards(&self) -> Vec<ShardId>;
}

/// Routes everything to shard 0.
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleShardRouter;

impl ShardRouter for SingleShardRouter {
    fn shard_for(&self, _storage_id: StorageId) -> ShardId {
        ShardId::from(0)
    }

    fn all_shards(&self) -> Vec<ShardId> {
        vec![ShardId::from(0)]
    }
}

/// Routes by storage id modulo the shard count.
#[derive(Debug, Clone, Copy)]
pub struct ModuloShardRouter {
    shard_count: u32,
}

impl ModuloShardRouter {
    pub fn new(shard_count: u32) -> MetadataResult<Self> {
        if shard_count == 0 {
            return Err(MetadataError::Config(
                "modulo routing needs at least one shard".to_string(),
            ));
        }
        Ok(Self { shard_count })
    }
}

impl ShardRouter for ModuloShardRouter {
    fn shard_for(&self, storage_id: StorageId) -> ShardId {
        let shard = storage_id.get().rem_euclid(i64::from(self.shard_count));
        // rem_euclid keeps the value in 0..shard_count
        ShardId::from(shard as u32)
    }

    fn all_shards(&self) -> Vec<ShardId> {
        (0..self.shard_count).map(ShardId::from).collect()
    }
}

/// Build the router described by the sharding configuration.
pub fn router_from_config(config: &ShardingConfig) -> MetadataResult<Arc<dyn ShardRouter>> {
    config.validate().map_err(MetadataError::Config)?;
    match config.strategy {
        ShardStrategy::Single => Ok(Arc::new(SingleShardRouter)),
        ShardStrategy::Modulo => {
            let count = u32::try_from(config.shards.len())
                .map_err(|_| MetadataError::Config("too many shards".to_string()))?;
            Ok(Arc::new(ModuloShardRouter::new(count)?))
        }
    }
}

/// Connection owning one shard's database.
///
/// The pool holds a single connection. [`ShardConnection::begin`] takes it for
/// the lifetime of the transaction and hands back a separate connection handle
/// whose scoped queries run inside that transaction. Queries through any other
/// handle for the shard wait for the pool until the transaction ends.
pub struct ShardConnection {
    shard: ShardId,
    pool: Pool<Sqlite>,
    tx: Mutex<Option<Transaction<'static, Sqlite>>>,
    queries: Arc<AtomicU64>,
}

impl ShardConnection {
    /// Open (creating if missing) the SQLite database for a shard and
    /// ensure its schema exists.
    pub async fn open_sqlite(
        shard: ShardId,
        path: impl AsRef<Path>,
        query_timeout_secs: Option<u64>,
    ) -> MetadataResult<Self> {
        let path = path.as_ref();
        let timeout = Duration::from_secs(query_timeout_secs.unwrap_or(30));

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            // A shard is a single shared handle; transactions opened through
            // begin() must see every statement issued on the shard.
            .max_connections(1)
            .acquire_timeout(timeout)
            .connect_with(opts)
            .await?;

        let connection = Self::from_pool(shard, pool);
        connection.migrate().await?;

        tracing::info!(shard = %shard, path = %path.display(), "Opened shard database");
        Ok(connection)
    }

    /// Wrap an existing pool. The schema is not touched.
    pub fn from_pool(shard: ShardId, pool: Pool<Sqlite>) -> Self {
        Self {
            shard,
            pool,
            tx: Mutex::new(None),
            queries: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn shard(&self) -> ShardId {
        self.shard
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Scoped query restricted to the file-cache tables.
    pub fn query(&self) -> ScopedQuery<'_> {
        ScopedQuery::new(self)
    }

    /// Number of statements executed through scoped queries so far, across
    /// every handle of the shard.
    pub fn query_count(&self) -> u64 {
        self.queries.load(Ordering::Relaxed)
    }

    pub(crate) fn record_query(&self) {
        self.queries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) async fn lock_transaction(
        &self,
    ) -> MutexGuard<'_, Option<Transaction<'static, Sqlite>>> {
        self.tx.lock().await
    }

    /// Create the shard schema if it does not exist yet.
    pub async fn migrate(&self) -> MetadataResult<()> {
        let mut tx = self.tx.lock().await;
        match tx.as_mut() {
            Some(tx) => sqlx::query(SCHEMA_SQL).execute(&mut **tx).await?,
            None => sqlx::query(SCHEMA_SQL).execute(&self.pool).await?,
        };
        Ok(())
    }

    /// Check database connectivity.
    pub async fn health_check(&self) -> MetadataResult<()> {
        let mut tx = self.tx.lock().await;
        match tx.as_mut() {
            Some(tx) => sqlx::query("SELECT 1").execute(&mut **tx).await?,
            None => sqlx::query("SELECT 1").execute(&self.pool).await?,
        };
        Ok(())
    }

    /// Open a transaction on this shard and return the handle owning it.
    ///
    /// Waits while another handle holds a transaction on the shard. Nesting on
    /// a handle that already owns an open transaction is not supported.
    pub async fn begin(&self) -> MetadataResult<ShardConnection> {
        if self.in_transaction().await {
            return Err(MetadataError::TransactionActive(self.shard));
        }
        let tx = self.pool.begin().await?;
        tracing::debug!(shard = %self.shard, "Transaction started");
        Ok(Self {
            shard: self.shard,
            pool: self.pool.clone(),
            tx: Mutex::new(Some(tx)),
            queries: Arc::clone(&self.queries),
        })
    }

    /// Whether this handle owns an open transaction.
    pub async fn in_transaction(&self) -> bool {
        self.tx.lock().await.is_some()
    }

    pub async fn commit(&self) -> MetadataResult<()> {
        let tx = self
            .tx
            .lock()
            .await
            .take()
            .ok_or(MetadataError::NoTransaction(self.shard))?;
        tx.commit().await?;
        tracing::debug!(shard = %self.shard, "Transaction committed");
        Ok(())
    }

    pub async fn roll_back(&self) -> MetadataResult<()> {
        let tx = self
            .tx
            .lock()
            .await
            .take()
            .ok_or(MetadataError::NoTransaction(self.shard))?;
        tx.rollback().await?;
        tracing::debug!(shard = %self.shard, "Transaction rolled back");
        Ok(())
    }
}

impl std::fmt::Debug for ShardConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardConnection")
            .field("shard", &self.shard)
            .field("queries", &self.query_count())
            .finish_non_exhaustive()
    }
}

const SCHEMA_SQL: &str = r#"
-- File cache: one row per file, owned by the shard of its storage
CREATE TABLE IF NOT EXISTS filecache (
    fileid INTEGER PRIMARY KEY,
    storage INTEGER NOT NULL,
    path TEXT NOT NULL DEFAULT '',
    path_hash TEXT NOT NULL,
    parent INTEGER NOT NULL DEFAULT -1,
    name TEXT NOT NULL DEFAULT '',
    mimetype TEXT NOT NULL DEFAULT 'application/octet-stream',
    size INTEGER NOT NULL DEFAULT 0,
    mtime INTEGER NOT NULL DEFAULT 0,
    storage_mtime INTEGER NOT NULL DEFAULT 0,
    encrypted INTEGER NOT NULL DEFAULT 0,
    etag TEXT NOT NULL DEFAULT '',
    permissions INTEGER NOT NULL DEFAULT 0,
    checksum TEXT NOT NULL DEFAULT ''
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_filecache_storage_path_hash
    ON filecache (storage, path_hash);
CREATE INDEX IF NOT EXISTS idx_filecache_parent ON filecache (parent);

-- Rarely used file properties kept out of the hot table
CREATE TABLE IF NOT EXISTS filecache_extended (
    fileid INTEGER PRIMARY KEY,
    metadata_etag TEXT,
    creation_time INTEGER,
    upload_time INTEGER
);

-- JSON metadata, guarded by sync_token
CREATE TABLE IF NOT EXISTS files_metadata (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    file_id INTEGER NOT NULL,
    json TEXT NOT NULL,
    sync_token TEXT NOT NULL,
    last_update INTEGER NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_files_metadata_file_id ON files_metadata (file_id);
"#;
