use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use tokio_test::{assert_err, assert_ok};

use dog_gridfs::{
    codec, BucketConfig, ByteStream, CatalogRepository, CatalogRepositoryExt, ChunkRecord,
    DownloadRequest, FileCriteria, FileId, FileRecord, GridBucket, GridError, MemoryCatalog,
    Revision, UploadOptions, UploadState,
};

/// Test factory functions
fn content(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 256) as u8).collect()
}

fn bucket_with(store: &MemoryCatalog, chunk_size: u32) -> GridBucket {
    GridBucket::in_memory(store, BucketConfig::new().with_chunk_size(chunk_size)).unwrap()
}

fn body_in_pieces(data: &[u8], piece: usize) -> ByteStream {
    let items: Vec<Result<Bytes, std::io::Error>> = data
        .chunks(piece.max(1))
        .map(|p| Ok(Bytes::copy_from_slice(p)))
        .collect();
    Box::pin(futures_util::stream::iter(items))
}

fn record(id: FileId, length: u64, chunk_size: u32) -> FileRecord {
    FileRecord {
        id,
        filename: "manual.bin".to_string(),
        length,
        chunk_size,
        upload_date: chrono::Utc::now(),
        content_hash: None,
        content_type: None,
        aliases: Vec::new(),
        metadata: serde_json::Value::Null,
    }
}

/// B1. Round Trip Across Chunk Sizes
#[tokio::test]
async fn test_round_trip_across_chunk_sizes() {
    let data = content(1000);

    for chunk_size in [1u32, 7, 100, 999, 1000, 1001, 255 * 1024] {
        let store = MemoryCatalog::new();
        let bucket = bucket_with(&store, chunk_size);

        let file = bucket
            .upload_and_await("data.bin", UploadOptions::new(), body_in_pieces(&data, 33))
            .await
            .unwrap();

        let bytes = bucket.download_buffered(&DownloadRequest::by_id(file.id.clone())).await.unwrap();
        assert_eq!(&bytes[..], &data[..], "chunk size {}", chunk_size);
    }
}

/// B2. Chunk Count Invariant
#[tokio::test]
async fn test_chunk_count_matches_length() {
    let store = MemoryCatalog::new();
    let bucket = bucket_with(&store, 100);
    let data = content(1050);

    let file = bucket
        .upload_and_await("data.bin", UploadOptions::new(), body_in_pieces(&data, 64))
        .await
        .unwrap();

    assert_eq!(file.length, 1050);
    assert_eq!(file.chunk_count(), 11);

    let chunks = store.list_chunks(&file.id, 0, 100).await.unwrap();
    assert_eq!(chunks.len(), 11);
    assert!(chunks.iter().enumerate().all(|(i, c)| c.n == i as u32));
    assert_eq!(chunks.iter().map(ChunkRecord::len).sum::<usize>(), 1050);
    assert_eq!(chunks.last().unwrap().len(), 50);
    assert!(chunks[..10].iter().all(|c| c.len() == 100));
}

/// B3. Range Read Inside One Chunk
#[tokio::test]
async fn test_range_read_returns_exact_window() {
    let store = MemoryCatalog::new();
    let bucket = bucket_with(&store, 100);
    let data = content(1000);

    let file = bucket
        .upload_and_await("data.bin", UploadOptions::new(), body_in_pieces(&data, 1000))
        .await
        .unwrap();

    let request = DownloadRequest::by_id(file.id).with_range(250, 260);
    let mut stream = bucket.download_stream(&request).await.unwrap();

    let mut out = Vec::new();
    while let Some(part) = stream.next().await {
        out.extend_from_slice(&part.unwrap());
    }
    assert_eq!(out.len(), 10);
    assert_eq!(out, &data[250..260]);
}

/// B4. Revision Resolution
#[tokio::test]
async fn test_revision_resolution() {
    let store = MemoryCatalog::new();
    let bucket = bucket_with(&store, 4);

    let mut uploaded = Vec::new();
    for body in ["t1", "t2", "t3"] {
        let file = bucket
            .upload_bytes("a.txt", UploadOptions::new(), Bytes::from(body))
            .await
            .unwrap();
        uploaded.push(file);
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    let pick = |revision: i64| FileCriteria::filename_revision("a.txt", Revision::new(revision));

    assert_eq!(bucket.find_one(&pick(0)).await.unwrap().id, uploaded[0].id);
    assert_eq!(bucket.find_one(&pick(-1)).await.unwrap().id, uploaded[2].id);
    assert_eq!(bucket.find_one(&pick(1)).await.unwrap().id, uploaded[1].id);
    assert_eq!(bucket.find_one(&pick(-3)).await.unwrap().id, uploaded[0].id);

    let err = bucket.find_one(&pick(5)).await.unwrap_err();
    assert!(matches!(err, GridError::NotFound { .. }));

    // default revision is the newest
    let latest = bucket.download_buffered(&DownloadRequest::by_name("a.txt")).await.unwrap();
    assert_eq!(&latest[..], b"t3");
}

/// B5. Deletion Completeness
#[tokio::test]
async fn test_remove_leaves_nothing_reachable() {
    let store = MemoryCatalog::new();
    let bucket = bucket_with(&store, 10);
    let file = bucket
        .upload_bytes("gone.bin", UploadOptions::new(), Bytes::from(content(95)))
        .await
        .unwrap();

    let removed = bucket.remove(&file.id).await.unwrap();
    assert_eq!(removed, file);

    assert!(bucket.find_by_id(&file.id).await.unwrap_err().is_not_found());
    for n in [0u32, 1, 10, 1000] {
        match store.list_chunks(&file.id, 0, n).await {
            Ok(chunks) => assert!(chunks.is_empty()),
            Err(e) => assert!(e.is_not_found()),
        }
    }
    assert_eq!(store.stored_chunk_count(&file.id), 0);
}

/// B6. Idempotent Chunk Insert
#[tokio::test]
async fn test_chunk_insert_is_idempotent() {
    let store = MemoryCatalog::new();
    let id = store.allocate_file_id().await.unwrap();
    let payload = Bytes::from_static(b"0123456789");

    // Arrange: chunks 0..=3, chunk 3 written twice
    for n in 0..3 {
        assert_ok!(store.put_chunk(&id, n, payload.clone()).await);
    }
    assert_ok!(store.put_chunk(&id, 3, payload.clone()).await);
    assert_ok!(store.put_chunk(&id, 3, payload.clone()).await);
    assert_eq!(store.stored_chunk_count(&id), 4);

    // Act: finalize
    store.finalize_file(record(id.clone(), 40, 10)).await.unwrap();

    // Assert: exactly one record at index 3
    let third = store.list_chunks(&id, 3, 4).await.unwrap();
    assert_eq!(third.len(), 1);
    assert_eq!(third[0].data, payload);
}

/// B7. Concurrent Independent Uploads
#[tokio::test]
async fn test_concurrent_uploads_stay_independent() {
    let store = MemoryCatalog::new();
    let bucket = bucket_with(&store, 3);
    let left = content(301);
    let right: Vec<u8> = content(257).into_iter().rev().collect();

    let mut up_left = bucket.upload_stream("left.bin", UploadOptions::new()).await.unwrap();
    let mut up_right = bucket.upload_stream("right.bin", UploadOptions::new()).await.unwrap();

    let feed_left = async {
        for piece in left.chunks(5) {
            up_left.write(Bytes::copy_from_slice(piece)).await?;
            tokio::task::yield_now().await;
        }
        up_left.finish().await
    };
    let feed_right = async {
        for piece in right.chunks(4) {
            up_right.write(Bytes::copy_from_slice(piece)).await?;
            tokio::task::yield_now().await;
        }
        up_right.finish().await
    };

    let (l, r) = tokio::join!(feed_left, feed_right);
    let (l, r) = (l.unwrap(), r.unwrap());
    assert_ne!(l.id, r.id);

    let got_left = bucket.download_buffered(&DownloadRequest::by_id(l.id.clone())).await.unwrap();
    let got_right = bucket.download_buffered(&DownloadRequest::by_id(r.id.clone())).await.unwrap();
    assert_eq!(&got_left[..], &left[..]);
    assert_eq!(&got_right[..], &right[..]);
    assert_eq!(l.chunk_count(), 101);
    assert_eq!(r.chunk_count(), 86);
}

/// B8. Pending Upload Is Invisible
#[tokio::test]
async fn test_pending_upload_is_invisible() {
    let store = MemoryCatalog::new();
    let bucket = bucket_with(&store, 4);

    let mut upload = bucket.upload_stream("wip.bin", UploadOptions::new()).await.unwrap();
    upload.write(Bytes::from_static(b"12345678")).await.unwrap();
    assert_eq!(upload.chunks_written(), 2);
    assert_eq!(upload.state(), UploadState::Writing);

    assert!(bucket.find_by_id(upload.id()).await.unwrap_err().is_not_found());
    assert!(bucket
        .find_one(&FileCriteria::filename("wip.bin"))
        .await
        .unwrap_err()
        .is_not_found());
    assert!(store.list_chunks(upload.id(), 0, 10).await.unwrap_err().is_not_found());

    let file = upload.finish().await.unwrap();
    assert_eq!(bucket.find_by_id(&file.id).await.unwrap(), file);
}

/// B9. Double Finalize Is Rejected
#[tokio::test]
async fn test_double_finalize_is_rejected() {
    let store = MemoryCatalog::new();
    let id = store.allocate_file_id().await.unwrap();
    store.put_chunk(&id, 0, Bytes::from_static(b"x")).await.unwrap();

    assert_ok!(store.finalize_file(record(id.clone(), 1, 10)).await);
    let err = assert_err!(store.finalize_file(record(id.clone(), 1, 10)).await);
    assert!(matches!(err, GridError::AlreadyFinalized { .. }));
}

/// B10. Storage Failure Leaves Orphans The Reaper Collects
#[tokio::test]
async fn test_failed_upload_orphans_are_reaped() {
    let store = MemoryCatalog::new();
    let config = BucketConfig::new()
        .with_chunk_size(10)
        .with_orphan_grace(Duration::ZERO);
    let bucket = GridBucket::in_memory(&store, config).unwrap();

    store.fail_chunk_writes_after(2);
    let err = bucket
        .upload_and_await("doomed.bin", UploadOptions::new(), body_in_pieces(&content(100), 100))
        .await
        .unwrap_err();
    assert!(matches!(err, GridError::StorageUnavailable { .. }));
    store.clear_faults();

    // Assert: nothing visible, but partial chunks remain
    assert_eq!(store.file_count(), 0);
    assert_eq!(store.pending_count(), 1);

    tokio::time::sleep(Duration::from_millis(5)).await;
    let reaped = bucket.reaper().reap_once().await.unwrap();
    assert_eq!(reaped, 1);
    assert_eq!(store.pending_count(), 0);
}

/// B11. Caller-Supplied Ids
#[tokio::test]
async fn test_custom_id_is_used_and_collisions_rejected() {
    let store = MemoryCatalog::new();
    let bucket = bucket_with(&store, 16);
    let id = FileId::from("invoice-2024-001");

    let file = bucket
        .upload_bytes("invoice.pdf", UploadOptions::new().with_id(id.clone()), Bytes::from_static(b"%PDF"))
        .await
        .unwrap();
    assert_eq!(file.id, id);

    let err = bucket
        .upload_bytes("other.pdf", UploadOptions::new().with_id(id.clone()), Bytes::from_static(b"%PDF"))
        .await
        .unwrap_err();
    assert!(matches!(err, GridError::AlreadyFinalized { .. }));
    assert_eq!(bucket.find_by_id(&id).await.unwrap().filename, "invoice.pdf");
}

/// B12. Content Hash And Per-File Options
#[tokio::test]
async fn test_content_hash_and_upload_options() {
    let store = MemoryCatalog::new();
    let bucket = bucket_with(&store, 100);
    let data = content(250);

    let options = UploadOptions::new()
        .with_chunk_size(64)
        .with_content_type("application/octet-stream")
        .with_aliases(["raw", "blob", "raw"])
        .with_metadata_field("owner", "ops");
    let file = bucket
        .upload_bytes("opts.bin", options, Bytes::from(data.clone()))
        .await
        .unwrap();

    assert_eq!(file.chunk_size, 64);
    assert_eq!(file.chunk_count(), 4);
    assert_eq!(file.content_hash.as_deref(), Some(codec::digest([&data[..]]).as_str()));
    assert_eq!(file.content_type.as_deref(), Some("application/octet-stream"));
    assert_eq!(file.aliases, vec!["raw", "blob"]);
    assert_eq!(file.metadata["owner"], "ops");
    assert_eq!(file.created_at(), file.upload_date);

    let unhashed = GridBucket::in_memory(&store, BucketConfig::new().disable_content_hash()).unwrap();
    let plain = unhashed
        .upload_bytes("plain.bin", UploadOptions::new(), Bytes::from_static(b"abc"))
        .await
        .unwrap();
    assert!(plain.content_hash.is_none());
}

/// B13. Download Errors
#[tokio::test]
async fn test_download_errors() {
    let store = MemoryCatalog::new();
    let bucket = bucket_with(&store, 10);
    let file = bucket
        .upload_bytes("small.bin", UploadOptions::new(), Bytes::from(content(30)))
        .await
        .unwrap();

    let missing = bucket.download_stream(&DownloadRequest::by_name("nope.bin")).await;
    assert!(missing.err().map_or(false, |e| e.is_not_found()));

    let neither = bucket.download_buffered(&DownloadRequest::default()).await.unwrap_err();
    assert!(matches!(neither, GridError::InvalidArgument { .. }));

    let backwards = DownloadRequest::by_id(file.id.clone()).with_range(20, 10);
    assert!(matches!(
        bucket.download_buffered(&backwards).await,
        Err(GridError::InvalidArgument { .. })
    ));

    let empty = DownloadRequest::by_id(file.id.clone()).with_range(12, 12);
    assert!(bucket.download_buffered(&empty).await.unwrap().is_empty());

    // store goes away mid-stream
    let mut stream = bucket.download_stream(&DownloadRequest::by_id(file.id.clone())).await.unwrap();
    assert!(stream.next().await.unwrap().is_ok());
    store.set_offline(true);
    let err = stream.next().await.unwrap().unwrap_err();
    assert!(matches!(GridError::from_io(err), GridError::StorageUnavailable { .. }));
    assert!(stream.next().await.is_none());
}

/// B14. Catalog Shared Through An Arc
#[tokio::test]
async fn test_bucket_over_shared_catalog() {
    let store = MemoryCatalog::new();
    let catalog: Arc<dyn CatalogRepository> = Arc::new(store.bucket("archive"));
    let bucket = GridBucket::with_catalog(catalog, BucketConfig::new().with_bucket_name("archive")).unwrap();

    let file = bucket
        .upload_bytes("old.log", UploadOptions::new(), Bytes::from_static(b"log line"))
        .await
        .unwrap();

    assert_eq!(bucket.config().files_collection(), "archive.files");
    assert_eq!(store.bucket("archive").file_count(), 1);
    assert_eq!(store.file_count(), 0);
    assert!(bucket.unlink(&file.id).await.is_ok());
}

/// B15. Upload Reaped Mid-Stream Is Never Published
#[tokio::test]
async fn test_reaped_upload_is_never_published() {
    // Arrange
    let store = MemoryCatalog::new();
    let config = BucketConfig::new()
        .with_chunk_size(4)
        .with_orphan_grace(Duration::ZERO);
    let bucket = GridBucket::in_memory(&store, config).unwrap();
    let mut upload = bucket.upload_stream("stalled.bin", UploadOptions::new()).await.unwrap();
    upload.write(Bytes::from_static(b"abcd")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;

    // Act
    assert_eq!(bucket.reaper().reap_once().await.unwrap(), 1);
    let write = upload.write(Bytes::from_static(b"efgh")).await;
    let finish = upload.finish().await;

    // Assert
    assert!(assert_err!(write).is_not_found());
    assert!(assert_err!(finish).is_not_found());
    assert_eq!(upload.state(), UploadState::Failed);
    assert!(bucket
        .find_one(&FileCriteria::filename("stalled.bin"))
        .await
        .unwrap_err()
        .is_not_found());
    assert_eq!(store.pending_count(), 0);
}

/// B16. One Writer Per Caller-Supplied Id
#[tokio::test]
async fn test_custom_id_has_one_writer() {
    // Arrange
    let store = MemoryCatalog::new();
    let bucket = bucket_with(&store, 4);
    let options = UploadOptions::new().with_id(FileId::from("same"));

    // Act
    let mut first = bucket.upload_stream("a.txt", options.clone()).await.unwrap();
    let second = bucket.upload_stream("b.txt", options).await;
    first.write(Bytes::from_static(b"aaaa")).await.unwrap();
    let file = first.finish().await.unwrap();

    // Assert
    let err = assert_err!(second);
    assert!(matches!(err, GridError::AlreadyFinalized { .. }));
    let bytes = bucket.download_buffered(&DownloadRequest::by_id(file.id.clone())).await.unwrap();
    assert_eq!(&bytes[..], b"aaaa");
    assert_eq!(file.content_hash.as_deref(), Some(codec::digest([&b"aaaa"[..]]).as_str()));
}
