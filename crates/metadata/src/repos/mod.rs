//! Repository traits for file cache and metadata operations.

pub mod file_cache;
pub mod files_metadata;
pub mod transactions;

pub use file_cache::FileCacheRepo;
pub use files_metadata::FilesMetadataRepo;
pub use transactions::ShardTransactions;
