//! File, storage and shard identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Global identifier of a file-cache record, unique across all shards.
///
/// Always strictly positive.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct FileId(i64);

impl FileId {
    /// Create a file id, rejecting zero and negative values.
    pub fn new(id: i64) -> crate::Result<Self> {
        if id <= 0 {
            return Err(crate::Error::InvalidId(format!(
                "file id must be positive, got {id}"
            )));
        }
        Ok(Self(id))
    }

    /// Get the raw integer value.
    pub fn get(self) -> i64 {
        self.0
    }
}

impl TryFrom<i64> for FileId {
    type Error = crate::Error;

    fn try_from(id: i64) -> crate::Result<Self> {
        Self::new(id)
    }
}

impl From<FileId> for i64 {
    fn from(id: FileId) -> Self {
        id.0
    }
}

impl fmt::Debug for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FileId({})", self.0)
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of the physical storage backend a file belongs to.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StorageId(i64);

impl StorageId {
    /// Get the raw integer value.
    pub fn get(self) -> i64 {
        self.0
    }
}

impl From<i64> for StorageId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl fmt::Debug for StorageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StorageId({})", self.0)
    }
}

impl fmt::Display for StorageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Index of a shard in the configured shard list.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShardId(u32);

impl ShardId {
    /// Get the position of this shard in the configured shard list.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl From<u32> for ShardId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_id_rejects_non_positive() {
        assert!(FileId::new(0).is_err());
        assert!(FileId::new(-7).is_err());
        assert_eq!(FileId::new(42).unwrap().get(), 42);
    }

    #[test]
    fn test_file_id_serde_validates() {
        let id: FileId = serde_json::from_str("12").unwrap();
        assert_eq!(id.get(), 12);
        assert!(serde_json::from_str::<FileId>("0").is_err());
        assert_eq!(serde_json::to_string(&id).unwrap(), "12");
    }

    #[test]
    fn test_display_is_plain_integer() {
        assert_eq!(FileId::new(9).unwrap().to_string(), "9");
        assert_eq!(StorageId::from(3).to_string(), "3");
        assert_eq!(ShardId::from(1).to_string(), "1");
    }
}
