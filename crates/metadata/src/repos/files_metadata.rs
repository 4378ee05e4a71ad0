//! Per-file JSON metadata persistence.

use crate::error::MetadataResult;
use crate::models::FilesMetadata;
use async_trait::async_trait;
use filecache_core::FileId;
use std::collections::HashMap;

/// Repository for the `files_metadata` table.
#[async_trait]
pub trait FilesMetadataRepo: Send + Sync {
    /// Insert metadata for a file that has none yet.
    ///
    /// A fresh sync token is generated and written back into `metadata`.
    /// Fails with `AlreadyExists` if the file already has a row.
    async fn store(&self, metadata: &mut FilesMetadata) -> MetadataResult<()>;

    /// Read a file's metadata.
    ///
    /// When `etag` is `None` or empty the file's current etag is joined from
    /// the file cache. Both a missing row and a failed read return `NotFound`.
    async fn get_metadata_from_file_id(
        &self,
        file_id: FileId,
        etag: Option<&str>,
    ) -> MetadataResult<FilesMetadata>;

    /// Read metadata for several files. Files without metadata, and rows that
    /// do not hold a valid document, are absent from the result.
    async fn get_metadata_from_file_ids(
        &self,
        file_ids: &[FileId],
    ) -> MetadataResult<HashMap<FileId, FilesMetadata>>;

    /// Delete a file's metadata. Deleting missing metadata is not an error.
    async fn drop_metadata(&self, file_id: FileId) -> MetadataResult<()>;

    /// Write `metadata` if its sync token still matches the stored row.
    ///
    /// Returns the number of rows changed. `0` means another writer updated
    /// the row since it was read; the caller must re-read before retrying.
    /// On success the new sync token is written back into `metadata`.
    async fn update_metadata(&self, metadata: &mut FilesMetadata) -> MetadataResult<u64>;
}
