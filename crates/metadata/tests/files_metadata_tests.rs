//! Metadata persistence and sync token guarded updates.

mod common;

use common::{RecordingCache, TestStore, fid};
use filecache_metadata::{FilesMetadata, FilesMetadataRepo, MetadataError};
use serde_json::json;

async fn test_store() -> TestStore {
    TestStore::with_cache(1, RecordingCache::new())
        .await
        .expect("Failed to create store")
}

#[tokio::test]
async fn test_store_then_read_round_trip() {
    let t = test_store().await;
    let mut metadata = FilesMetadata::new(fid(21));
    metadata.set("photos-size", json!({"width": 1920, "height": 1080}));
    metadata.set("blurhash", "LEHV6nWB2yk8");

    t.store.store(&mut metadata).await.expect("Store failed");
    assert_eq!(metadata.sync_token(), "tok0001");

    let read = t
        .store
        .get_metadata_from_file_id(fid(21), None)
        .await
        .expect("Read failed");
    assert_eq!(read.json(), metadata.json());
    assert_eq!(read.sync_token(), "tok0001");
    assert_eq!(read.get_string("blurhash"), Some("LEHV6nWB2yk8"));
    assert!(read.last_update().is_some());
}

#[tokio::test]
async fn test_store_twice_is_rejected() {
    let t = test_store().await;
    let mut metadata = FilesMetadata::new(fid(3));
    t.store.store(&mut metadata).await.unwrap();

    let mut again = FilesMetadata::new(fid(3));
    let err = t.store.store(&mut again).await.unwrap_err();
    assert!(matches!(err, MetadataError::AlreadyExists(_)));
    assert_eq!(again.sync_token(), "");
}

#[tokio::test]
async fn test_missing_metadata_is_not_found() {
    let t = test_store().await;
    let err = t
        .store
        .get_metadata_from_file_id(fid(404), None)
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_etag_joined_from_file_cache() {
    let t = test_store().await;
    t.insert_file_with_etag(10, 1, "files/pic.jpg", "5f3a").await;
    t.store.store(&mut FilesMetadata::new(fid(10))).await.unwrap();
    t.store.store(&mut FilesMetadata::new(fid(11))).await.unwrap();

    let joined = t.store.get_metadata_from_file_id(fid(10), None).await.unwrap();
    assert_eq!(joined.etag(), "5f3a");

    let given = t
        .store
        .get_metadata_from_file_id(fid(10), Some("caller-etag"))
        .await
        .unwrap();
    assert_eq!(given.etag(), "caller-etag");

    // An empty etag counts as unknown
    let empty = t
        .store
        .get_metadata_from_file_id(fid(10), Some(""))
        .await
        .unwrap();
    assert_eq!(empty.etag(), "5f3a");

    // No file cache row to join
    let orphan = t.store.get_metadata_from_file_id(fid(11), None).await.unwrap();
    assert_eq!(orphan.etag(), "");
}

#[tokio::test]
async fn test_concurrent_writers_conflict() {
    let t = test_store().await;
    let mut initial = FilesMetadata::new(fid(42));
    initial.set("rating", 1);
    t.store.store(&mut initial).await.unwrap();

    let mut reader_a = t.store.get_metadata_from_file_id(fid(42), None).await.unwrap();
    let mut reader_b = t.store.get_metadata_from_file_id(fid(42), None).await.unwrap();
    assert_eq!(reader_a.sync_token(), reader_b.sync_token());

    reader_a.set("rating", 5);
    let changed = t.store.update_metadata(&mut reader_a).await.unwrap();
    assert_eq!(changed, 1);
    assert_eq!(reader_a.sync_token(), "tok0002");

    reader_b.set("rating", 2);
    let stale_token = reader_b.sync_token().to_string();
    let changed = t.store.update_metadata(&mut reader_b).await.unwrap();
    assert_eq!(changed, 0);
    assert_eq!(reader_b.sync_token(), stale_token);

    let stored = t.store.get_metadata_from_file_id(fid(42), None).await.unwrap();
    assert_eq!(stored.get_int("rating"), Some(5));
    assert_eq!(stored.sync_token(), "tok0002");

    // After re-reading, the loser can apply its change
    let mut retry = stored.clone();
    retry.set("rating", 2);
    assert_eq!(t.store.update_metadata(&mut retry).await.unwrap(), 1);
}

#[tokio::test]
async fn test_update_without_row_changes_nothing() {
    let t = test_store().await;
    let mut metadata = FilesMetadata::new(fid(77));
    metadata.set("k", "v");
    assert_eq!(t.store.update_metadata(&mut metadata).await.unwrap(), 0);
}

#[tokio::test]
async fn test_drop_metadata_is_idempotent() {
    let t = test_store().await;
    t.store.store(&mut FilesMetadata::new(fid(9))).await.unwrap();

    t.store.drop_metadata(fid(9)).await.expect("First drop failed");
    t.store.drop_metadata(fid(9)).await.expect("Second drop failed");

    let err = t.store.get_metadata_from_file_id(fid(9), None).await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_batch_read_skips_unreadable_rows() {
    let t = test_store().await;
    t.insert_file_with_etag(1, 0, "files/one", "e1").await;
    let mut one = FilesMetadata::new(fid(1));
    one.set("a", true);
    t.store.store(&mut one).await.unwrap();
    t.insert_raw_metadata(2, "{not json", "legacy1").await;
    t.insert_raw_metadata(3, "[]", "legacy2").await;
    t.insert_raw_metadata(4, "42", "legacy3").await;

    let found = t
        .store
        .get_metadata_from_file_ids(&[fid(1), fid(2), fid(3), fid(4), fid(5)])
        .await
        .unwrap();

    let mut ids: Vec<_> = found.keys().map(|id| id.get()).collect();
    ids.sort();
    assert_eq!(ids, vec![1, 3]);
    assert_eq!(found[&fid(1)].etag(), "e1");
    assert_eq!(found[&fid(1)].get_bool("a"), Some(true));
    assert!(found[&fid(3)].json().is_empty());

    let err = t.store.get_metadata_from_file_id(fid(2), None).await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_read_errors_collapse_to_not_found() {
    let t = test_store().await;
    t.store.store(&mut FilesMetadata::new(fid(5))).await.unwrap();
    sqlx::query("DROP TABLE files_metadata")
        .execute(t.shard(0).pool())
        .await
        .unwrap();

    let err = t.store.get_metadata_from_file_id(fid(5), None).await.unwrap_err();
    assert!(err.is_not_found());

    // Writes propagate the failure
    let err = t.store.drop_metadata(fid(5)).await.unwrap_err();
    assert!(matches!(err, MetadataError::Database(_)));
}

#[tokio::test]
async fn test_metadata_lives_on_first_shard() {
    let t = TestStore::new(2).await.expect("Failed to create store");
    t.insert_file_with_etag(8, 1, "files/on-shard-1", "remote").await;
    t.store.store(&mut FilesMetadata::new(fid(8))).await.unwrap();

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM files_metadata")
        .fetch_one(t.shard(0).pool())
        .await
        .unwrap();
    assert_eq!(count, 1);

    // The file itself is on another shard, so no etag can be joined
    let read = t.store.get_metadata_from_file_id(fid(8), None).await.unwrap();
    assert_eq!(read.etag(), "");
    assert_eq!(read.sync_token().len(), 7);
}
