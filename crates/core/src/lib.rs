//! Core types shared across the file cache crates.
//!
//! This crate defines the vocabulary used by the lookup and metadata layers:
//! - File, storage and shard identifiers
//! - Sharding, shard connection and location cache configuration

pub mod config;
pub mod error;
pub mod ids;

pub use error::{Error, Result};
pub use ids::{FileId, ShardId, StorageId};

/// Name of the node-local cache mapping file ids to storage ids.
pub const LOCATION_CACHE_NAME: &str = "storage_by_fileid";

/// Length of a freshly generated metadata sync token.
pub const SYNC_TOKEN_LENGTH: usize = 7;
