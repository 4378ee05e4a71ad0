//! `files_metadata` requests for [`SqliteStore`].
//!
//! Writes are guarded by the row's sync token: an update only applies while
//! the token read by the caller is still the stored one. Nothing is locked
//! between the read and the write.

use crate::error::{MetadataError, MetadataResult};
use crate::models::{FilesMetadata, FilesMetadataRow};
use crate::query::{ScopedQuery, SqlValue, TABLE_FILECACHE, TABLE_FILES_METADATA};
use crate::repos::FilesMetadataRepo;
use crate::store::SqliteStore;
use async_trait::async_trait;
use filecache_core::FileId;
use std::collections::HashMap;

const METADATA_COLUMNS: [&str; 4] = ["m.file_id", "m.json", "m.sync_token", "m.last_update"];

impl SqliteStore {
    /// Select metadata rows, optionally joining the file's current etag.
    fn select_metadata(&self, with_etag: bool) -> MetadataResult<ScopedQuery<'_>> {
        let query = self.metadata_connection().query();
        if !with_etag {
            return query.select(TABLE_FILES_METADATA, "m", &METADATA_COLUMNS);
        }

        let mut columns = METADATA_COLUMNS.to_vec();
        columns.push("f.etag");
        query
            .select(TABLE_FILES_METADATA, "m", &columns)?
            .left_join(TABLE_FILECACHE, "f", "m.file_id = f.fileid")
    }
}

fn is_unique_violation(err: &MetadataError) -> bool {
    match err {
        MetadataError::Database(sqlx::Error::Database(db_err)) => db_err.is_unique_violation(),
        _ => false,
    }
}

#[async_trait]
impl FilesMetadataRepo for SqliteStore {
    async fn store(&self, metadata: &mut FilesMetadata) -> MetadataResult<()> {
        let file_id = metadata.file_id();
        let sync_token = self.tokens.generate();

        let result = self
            .metadata_connection()
            .query()
            .insert(
                TABLE_FILES_METADATA,
                vec![
                    ("file_id", SqlValue::Int(file_id.get())),
                    ("json", SqlValue::Text(metadata.to_json_string()?)),
                    ("sync_token", SqlValue::Text(sync_token.clone())),
                    ("last_update", SqlValue::Now),
                ],
            )?
            .execute()
            .await;

        match result {
            Ok(_) => {
                metadata.set_sync_token(sync_token);
                Ok(())
            }
            Err(e) if is_unique_violation(&e) => Err(MetadataError::AlreadyExists(format!(
                "metadata for file {file_id}"
            ))),
            Err(e) => Err(e),
        }
    }

    async fn get_metadata_from_file_id(
        &self,
        file_id: FileId,
        etag: Option<&str>,
    ) -> MetadataResult<FilesMetadata> {
        let etag = etag.filter(|etag| !etag.is_empty());
        let query = self
            .select_metadata(etag.is_none())?
            .where_int_eq("m.file_id", file_id.get());

        let row = match query.fetch_optional::<FilesMetadataRow>().await {
            Ok(row) => row,
            Err(e) => {
                tracing::warn!(file_id = %file_id, error = %e, "Failed to read file metadata");
                return Err(MetadataError::NotFound(format!("metadata for file {file_id}")));
            }
        };
        let Some(mut row) = row else {
            return Err(MetadataError::NotFound(format!("metadata for file {file_id}")));
        };

        let etag = row
            .etag
            .take()
            .unwrap_or_else(|| etag.unwrap_or_default().to_string());
        FilesMetadata::import_from_row(row, etag).map_err(|e| {
            tracing::warn!(file_id = %file_id, error = %e, "Stored file metadata is unreadable");
            MetadataError::NotFound(format!("metadata for file {file_id}"))
        })
    }

    async fn get_metadata_from_file_ids(
        &self,
        file_ids: &[FileId],
    ) -> MetadataResult<HashMap<FileId, FilesMetadata>> {
        if file_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let ids: Vec<i64> = file_ids.iter().map(|id| id.get()).collect();
        let rows = self
            .select_metadata(true)?
            .where_int_in("m.file_id", &ids)
            .fetch_all::<FilesMetadataRow>()
            .await?;

        let mut list = HashMap::with_capacity(rows.len());
        for mut row in rows {
            let etag = row.etag.take().unwrap_or_default();
            match FilesMetadata::import_from_row(row, etag) {
                Ok(metadata) => {
                    list.insert(metadata.file_id(), metadata);
                }
                Err(e) => {
                    tracing::debug!(error = %e, "Skipping unreadable file metadata row");
                }
            }
        }
        Ok(list)
    }

    async fn drop_metadata(&self, file_id: FileId) -> MetadataResult<()> {
        self.metadata_connection()
            .query()
            .delete_from(TABLE_FILES_METADATA)?
            .where_int_eq("file_id", file_id.get())
            .execute()
            .await?;
        Ok(())
    }

    async fn update_metadata(&self, metadata: &mut FilesMetadata) -> MetadataResult<u64> {
        let sync_token = self.tokens.generate();

        let changed = self
            .metadata_connection()
            .query()
            .update(
                TABLE_FILES_METADATA,
                vec![
                    ("json", SqlValue::Text(metadata.to_json_string()?)),
                    ("sync_token", SqlValue::Text(sync_token.clone())),
                    ("last_update", SqlValue::Now),
                ],
            )?
            .where_int_eq("file_id", metadata.file_id().get())
            .where_str_eq("sync_token", metadata.sync_token())
            .execute()
            .await?;

        if changed > 0 {
            metadata.set_sync_token(sync_token);
        } else {
            tracing::debug!(
                file_id = %metadata.file_id(),
                "Metadata update lost the sync token race"
            );
        }
        Ok(changed)
    }
}
