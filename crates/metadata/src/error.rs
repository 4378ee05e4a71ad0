//! Metadata store error types.

use filecache_core::ShardId;
use thiserror::Error;

/// File cache and metadata operation errors.
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    /// A scoped query referenced a table outside its allow-list.
    #[error("table '{table}' is not allowed in this query")]
    DisallowedTable { table: String },

    /// A scoped query fragment was not a plain identifier or column reference.
    #[error("'{0}' is not a plain identifier")]
    InvalidIdentifier(String),

    #[error("unknown shard: {0}")]
    UnknownShard(ShardId),

    #[error("row decode error: {0}")]
    Decode(String),

    #[error("no transaction open on shard {0}")]
    NoTransaction(ShardId),

    #[error("transaction already open on shard {0}")]
    TransactionActive(ShardId),
}

impl From<filecache_core::Error> for MetadataError {
    fn from(err: filecache_core::Error) -> Self {
        match err {
            filecache_core::Error::InvalidId(msg) => Self::Decode(msg),
            other => Self::Config(other.to_string()),
        }
    }
}

impl MetadataError {
    /// Whether the error signals an absent row rather than a failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Result type for metadata operations.
pub type MetadataResult<T> = std::result::Result<T, MetadataError>;
