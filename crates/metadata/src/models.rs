//! Database models mapping to the shard schema.

use crate::error::{MetadataError, MetadataResult};
use filecache_core::{FileId, StorageId};
use serde_json::{Map, Value};
use sqlx::FromRow;
use time::OffsetDateTime;

/// Highest valid permission bitmask (read, update, create, delete, share).
pub const PERMISSION_ALL: i64 = 31;

// =============================================================================
// File cache
// =============================================================================

/// Raw `filecache` row joined with `filecache_extended`.
#[derive(Debug, Clone, FromRow)]
pub struct FileCacheRow {
    pub fileid: i64,
    pub storage: i64,
    pub path: String,
    pub path_hash: String,
    pub parent: i64,
    pub name: String,
    pub mimetype: String,
    pub size: i64,
    pub mtime: i64,
    pub storage_mtime: i64,
    pub encrypted: bool,
    pub etag: String,
    pub permissions: i64,
    pub checksum: String,
    pub metadata_etag: Option<String>,
    pub creation_time: Option<i64>,
    pub upload_time: Option<i64>,
}

/// Immutable snapshot of a file's location and cache row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub file_id: FileId,
    pub storage_id: StorageId,
    pub path: String,
    pub path_hash: String,
    /// Parent file id, `-1` for a storage root.
    pub parent: i64,
    pub name: String,
    pub mimetype: String,
    /// Size in bytes, `-1` when unknown.
    pub size: i64,
    pub mtime: i64,
    pub storage_mtime: i64,
    pub encrypted: bool,
    pub etag: String,
    pub permissions: i64,
    pub checksum: String,
    pub metadata_etag: Option<String>,
    pub creation_time: Option<i64>,
    pub upload_time: Option<i64>,
}

impl TryFrom<FileCacheRow> for CacheEntry {
    type Error = MetadataError;

    fn try_from(row: FileCacheRow) -> MetadataResult<Self> {
        let file_id = FileId::new(row.fileid)?;
        if row.parent < -1 {
            return Err(MetadataError::Decode(format!(
                "file {file_id}: invalid parent {}",
                row.parent
            )));
        }
        if row.size < -1 {
            return Err(MetadataError::Decode(format!(
                "file {file_id}: invalid size {}",
                row.size
            )));
        }
        if !(0..=PERMISSION_ALL).contains(&row.permissions) {
            return Err(MetadataError::Decode(format!(
                "file {file_id}: invalid permissions {}",
                row.permissions
            )));
        }

        Ok(Self {
            file_id,
            storage_id: StorageId::from(row.storage),
            path: row.path,
            path_hash: row.path_hash,
            parent: row.parent,
            name: row.name,
            mimetype: row.mimetype,
            size: row.size,
            mtime: row.mtime,
            storage_mtime: row.storage_mtime,
            encrypted: row.encrypted,
            etag: row.etag,
            permissions: row.permissions,
            checksum: row.checksum,
            metadata_etag: row.metadata_etag,
            creation_time: row.creation_time,
            upload_time: row.upload_time,
        })
    }
}

// =============================================================================
// Files metadata
// =============================================================================

/// Raw `files_metadata` row, optionally joined with the file's etag.
#[derive(Debug, Clone, FromRow)]
pub struct FilesMetadataRow {
    pub file_id: i64,
    pub json: String,
    pub sync_token: String,
    pub last_update: i64,
    /// Only present when the query joined `filecache`.
    #[sqlx(default)]
    pub etag: Option<String>,
}

/// JSON metadata document attached to one file.
///
/// `sync_token` is the version stamp read from the database; updates only
/// apply while it still matches the stored row.
#[derive(Debug, Clone, PartialEq)]
pub struct FilesMetadata {
    file_id: FileId,
    etag: String,
    json: Map<String, Value>,
    sync_token: String,
    last_update: i64,
}

impl FilesMetadata {
    /// Create an empty document for a file that has no stored metadata yet.
    pub fn new(file_id: FileId) -> Self {
        Self {
            file_id,
            etag: String::new(),
            json: Map::new(),
            sync_token: String::new(),
            last_update: 0,
        }
    }

    /// Build a document from a stored row.
    ///
    /// The stored json must be an object. An empty array is accepted as an
    /// empty document since older writers serialized empty maps that way.
    pub fn import_from_row(row: FilesMetadataRow, etag: String) -> MetadataResult<Self> {
        let file_id = FileId::new(row.file_id)?;
        let json = match serde_json::from_str::<Value>(&row.json) {
            Ok(Value::Object(map)) => map,
            Ok(Value::Array(items)) if items.is_empty() => Map::new(),
            Ok(other) => {
                return Err(MetadataError::Decode(format!(
                    "metadata for file {file_id} is not an object: {other}"
                )));
            }
            Err(e) => {
                return Err(MetadataError::Decode(format!(
                    "metadata for file {file_id} is not valid json: {e}"
                )));
            }
        };

        Ok(Self {
            file_id,
            etag,
            json,
            sync_token: row.sync_token,
            last_update: row.last_update,
        })
    }

    pub fn file_id(&self) -> FileId {
        self.file_id
    }

    /// Etag of the file the metadata was read for, empty when unknown.
    pub fn etag(&self) -> &str {
        &self.etag
    }

    pub fn set_etag(&mut self, etag: impl Into<String>) {
        self.etag = etag.into();
    }

    pub fn sync_token(&self) -> &str {
        &self.sync_token
    }

    pub(crate) fn set_sync_token(&mut self, sync_token: String) {
        self.sync_token = sync_token;
    }

    /// Server-assigned unix timestamp of the last write.
    pub fn last_update_timestamp(&self) -> i64 {
        self.last_update
    }

    /// Last write time, `None` for documents that were never stored.
    pub fn last_update(&self) -> Option<OffsetDateTime> {
        if self.last_update == 0 {
            return None;
        }
        OffsetDateTime::from_unix_timestamp(self.last_update).ok()
    }

    /// The whole document.
    pub fn json(&self) -> &Map<String, Value> {
        &self.json
    }

    pub fn to_json_string(&self) -> MetadataResult<String> {
        Ok(serde_json::to_string(&self.json)?)
    }

    pub fn has(&self, key: &str) -> bool {
        self.json.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.json.keys().map(String::as_str)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.json.get(key)
    }

    pub fn get_string(&self, key: &str) -> Option<&str> {
        self.json.get(key).and_then(Value::as_str)
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        self.json.get(key).and_then(Value::as_i64)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.json.get(key).and_then(Value::as_bool)
    }

    /// Set a key, returning the previous value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.json.insert(key.into(), value.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.json.remove(key)
    }
}
