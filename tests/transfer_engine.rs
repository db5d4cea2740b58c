//! End-to-end behavior of the transfer engine over the in-memory store.
//! Sizes are scaled down: thresholds and part sizes are bytes, not MiB.

use bytes::Bytes;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use s3xfer::config::{TransferSettings, MIB};
use s3xfer::s3::{
    CompleteMultipartUploadResponse, CompletedPart, CreateMultipartUploadResponse,
    ListObjectsPage, MemoryStore, ObjectStore, PutObjectResponse, Result as StoreResult,
    StoreCall, UploadPartResponse, UploadStatus,
};
use s3xfer::transfer::{
    ErrorKind, Strategy, TransferEngine, TransferError, TransferReport, TransferSource,
};

fn settings(part_size: u64, threshold: u64) -> TransferSettings {
    TransferSettings {
        part_size,
        multipart_threshold: threshold,
        ..TransferSettings::default()
    }
}

fn engine_with(store: &Arc<MemoryStore>, settings: TransferSettings) -> TransferEngine {
    TransferEngine::new(store.clone(), settings)
}

/// Delegates to a `MemoryStore` but takes `delay` before every abort
struct SlowAbortStore {
    inner: Arc<MemoryStore>,
    delay: Duration,
}

#[async_trait::async_trait]
impl ObjectStore for SlowAbortStore {
    fn bucket(&self) -> &str {
        self.inner.bucket()
    }

    async fn put_object(&self, key: &str, data: Bytes) -> StoreResult<PutObjectResponse> {
        self.inner.put_object(key, data).await
    }

    async fn create_multipart_upload(
        &self,
        key: &str,
    ) -> StoreResult<CreateMultipartUploadResponse> {
        self.inner.create_multipart_upload(key).await
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        data: Bytes,
    ) -> StoreResult<UploadPartResponse> {
        self.inner.upload_part(key, upload_id, part_number, data).await
    }

    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> StoreResult<CompleteMultipartUploadResponse> {
        self.inner.complete_multipart_upload(key, upload_id, parts).await
    }

    async fn abort_multipart_upload(&self, key: &str, upload_id: &str) -> StoreResult<()> {
        tokio::time::sleep(self.delay).await;
        self.inner.abort_multipart_upload(key, upload_id).await
    }

    async fn get_object(&self, key: &str) -> StoreResult<Bytes> {
        self.inner.get_object(key).await
    }

    async fn list_objects_page(
        &self,
        prefix: Option<&str>,
        continuation_token: Option<&str>,
        max_keys: u32,
    ) -> StoreResult<ListObjectsPage> {
        self.inner
            .list_objects_page(prefix, continuation_token, max_keys)
            .await
    }

    async fn delete_object(&self, key: &str) -> StoreResult<()> {
        self.inner.delete_object(key).await
    }

    fn presign_get(&self, key: &str, expires: Duration) -> StoreResult<String> {
        self.inner.presign_get(key, expires)
    }
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

fn write_file(dir: &TempDir, name: &str, data: &[u8]) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, data).unwrap();
    path
}

fn part_sizes(store: &MemoryStore) -> Vec<(u32, u64)> {
    store
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            StoreCall::UploadPart {
                part_number, size, ..
            } => Some((part_number, size)),
            _ => None,
        })
        .collect()
}

fn completed_part_numbers(store: &MemoryStore) -> Vec<Vec<u32>> {
    store
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            StoreCall::Complete { part_numbers, .. } => Some(part_numbers),
            _ => None,
        })
        .collect()
}

fn count_calls(store: &MemoryStore, pred: impl Fn(&StoreCall) -> bool) -> usize {
    store.calls().iter().filter(|c| pred(c)).count()
}

#[tokio::test]
async fn test_small_upload_uses_single_shot() {
    let store = Arc::new(MemoryStore::new("bucket"));
    let engine = engine_with(&store, TransferSettings::default());
    let dir = TempDir::new().unwrap();
    let path = write_file(&dir, "a.txt", b"0123456789");

    let result = engine.upload_auto(&path, "a.txt").await.unwrap();

    assert_eq!(result.strategy, Strategy::SingleShot);
    assert_eq!(result.size, 10);
    assert_eq!(result.parts, None);
    assert_eq!(engine.settings().multipart_threshold, 100 * MIB);
    assert_eq!(count_calls(&store, |c| matches!(c, StoreCall::Put { .. })), 1);
    assert!(store.upload_ids().is_empty());
}

#[tokio::test]
async fn test_threshold_boundary_selects_strategy() {
    let store = Arc::new(MemoryStore::new("bucket"));
    let engine = engine_with(&store, settings(40, 100));
    let dir = TempDir::new().unwrap();

    let at = write_file(&dir, "at.bin", &pattern(100));
    let above = write_file(&dir, "above.bin", &pattern(101));
    let below = write_file(&dir, "below.bin", &pattern(99));

    assert_eq!(engine.upload_auto(&at, "at").await.unwrap().strategy, Strategy::SingleShot);
    assert_eq!(engine.upload_auto(&below, "below").await.unwrap().strategy, Strategy::SingleShot);

    let result = engine.upload_auto(&above, "above").await.unwrap();
    assert_eq!(result.strategy, Strategy::Multipart);
    assert_eq!(result.parts, Some(3));
    assert_eq!(store.object("above").unwrap(), Bytes::from(pattern(101)));
}

#[tokio::test]
async fn test_multipart_splits_into_expected_parts() {
    // 250 MiB in 100 MiB parts, scaled down to bytes
    let store = Arc::new(MemoryStore::new("bucket"));
    let engine = engine_with(&store, settings(100, 100));
    let dir = TempDir::new().unwrap();
    let data = pattern(250);
    let path = write_file(&dir, "big.bin", &data);

    let result = engine.upload_large(&path, "big.bin", None).await.unwrap();

    assert_eq!(result.parts, Some(3));
    assert_eq!(result.size, 250);
    assert_eq!(result.strategy, Strategy::Multipart);
    assert!(result.etag.ends_with("-3"));
    assert_eq!(part_sizes(&store), vec![(1, 100), (2, 100), (3, 50)]);
    assert_eq!(completed_part_numbers(&store), vec![vec![1, 2, 3]]);
    assert_eq!(store.object("big.bin").unwrap(), Bytes::from(data));
    assert_eq!(store.open_uploads(), 0);
}

#[tokio::test]
async fn test_part_count_and_lengths_for_many_sizes() {
    let dir = TempDir::new().unwrap();
    for (size, part_size) in [(1usize, 1u64), (7, 3), (9, 3), (10, 64), (64, 64), (65, 64), (1000, 33)] {
        let store = Arc::new(MemoryStore::new("bucket"));
        let engine = engine_with(&store, settings(part_size, 0));
        let data = pattern(size);
        let path = write_file(&dir, &format!("f{}_{}", size, part_size), &data);

        let result = engine.upload_large(&path, "obj", None).await.unwrap();

        let expected = (size as u64).div_ceil(part_size) as u32;
        let parts = part_sizes(&store);
        assert_eq!(result.parts, Some(expected), "size {} part {}", size, part_size);
        assert_eq!(parts.len() as u32, expected);
        assert_eq!(parts.iter().map(|(_, s)| s).sum::<u64>(), size as u64);
        for (i, (number, len)) in parts.iter().enumerate() {
            assert_eq!(*number as usize, i + 1);
            if i + 1 < parts.len() {
                assert_eq!(*len, part_size);
            } else {
                assert!(*len <= part_size && *len > 0);
            }
        }
        assert_eq!(
            completed_part_numbers(&store),
            vec![(1..=expected).collect::<Vec<u32>>()]
        );
        assert_eq!(store.object("obj").unwrap(), Bytes::from(data));
    }
}

#[tokio::test]
async fn test_failure_on_part_two_of_three_aborts_once() {
    let store = Arc::new(MemoryStore::new("bucket"));
    store.fail_part(2);
    let engine = engine_with(&store, settings(100, 100));
    let dir = TempDir::new().unwrap();
    let path = write_file(&dir, "big.bin", &pattern(250));

    let result = engine.upload_large(&path, "big.bin", None).await;
    let report = TransferReport::from_result("big.bin", &result);
    let err = result.unwrap_err();

    assert!(!report.success);
    assert_eq!(report.error_kind, Some(ErrorKind::PartialUpload));
    match &err {
        TransferError::PartialUpload {
            uploaded_parts,
            upload_id,
            source,
            ..
        } => {
            assert_eq!(*uploaded_parts, 1);
            assert_eq!(store.abort_calls(upload_id), 1);
            assert!(source.to_string().contains("UploadPart 2"));
        }
        other => panic!("expected PartialUpload, got {:?}", other),
    }

    let ids = store.upload_ids();
    assert_eq!(ids.len(), 1);
    assert_eq!(store.upload_status(&ids[0]), Some(UploadStatus::Aborted));
    assert!(completed_part_numbers(&store).is_empty());
    assert!(store.object("big.bin").is_none());
    // Part 3 is never attempted once part 2 fails
    assert_eq!(part_sizes(&store).len(), 2);
}

#[tokio::test]
async fn test_failure_on_any_part_aborts_exactly_once() {
    let dir = TempDir::new().unwrap();
    let path = write_file(&dir, "src.bin", &pattern(50));

    for k in 1..=5u32 {
        let store = Arc::new(MemoryStore::new("bucket"));
        store.fail_part(k);
        let engine = engine_with(&store, settings(10, 0));

        let err = engine.upload_large(&path, "obj", None).await.unwrap_err();

        let expected = if k == 1 {
            ErrorKind::Transfer
        } else {
            ErrorKind::PartialUpload
        };
        assert_eq!(err.kind(), expected, "failing part {}", k);

        let ids = store.upload_ids();
        assert_eq!(ids.len(), 1);
        assert_eq!(store.abort_calls(&ids[0]), 1, "failing part {}", k);
        assert_eq!(store.upload_status(&ids[0]), Some(UploadStatus::Aborted));
        assert_eq!(store.open_uploads(), 0);
        assert!(completed_part_numbers(&store).is_empty());
    }
}

#[tokio::test]
async fn test_complete_failure_aborts() {
    let store = Arc::new(MemoryStore::new("bucket"));
    store.fail_complete();
    let engine = engine_with(&store, settings(10, 0));
    let dir = TempDir::new().unwrap();
    let path = write_file(&dir, "src.bin", &pattern(25));

    let err = engine.upload_large(&path, "obj", None).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::PartialUpload);
    let ids = store.upload_ids();
    assert_eq!(store.abort_calls(&ids[0]), 1);
    assert_eq!(store.upload_status(&ids[0]), Some(UploadStatus::Aborted));
    assert!(store.object("obj").is_none());
}

#[tokio::test]
async fn test_abort_failure_keeps_original_error() {
    let store = Arc::new(MemoryStore::new("bucket"));
    store.fail_part(2);
    store.fail_abort();
    let engine = engine_with(&store, settings(10, 0));
    let dir = TempDir::new().unwrap();
    let path = write_file(&dir, "src.bin", &pattern(30));

    let err = engine.upload_large(&path, "obj", None).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::PartialUpload);
    let text = err.to_string();
    assert!(text.contains("UploadPart 2"), "{}", text);
    assert!(!text.contains("AbortMultipartUpload"), "{}", text);
    assert_eq!(store.abort_calls(&store.upload_ids()[0]), 1);
}

#[tokio::test]
async fn test_create_failure_is_transfer_error() {
    let store = Arc::new(MemoryStore::new("bucket"));
    store.fail_create();
    let engine = engine_with(&store, settings(10, 0));
    let dir = TempDir::new().unwrap();
    let path = write_file(&dir, "src.bin", &pattern(30));

    let err = engine.upload_large(&path, "obj", None).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Transfer);
    assert_eq!(count_calls(&store, |c| matches!(c, StoreCall::Abort { .. })), 0);
}

#[tokio::test]
async fn test_multipart_rejects_bad_input_before_session() {
    let store = Arc::new(MemoryStore::new("bucket"));
    let engine = engine_with(&store, settings(10, 0));
    let dir = TempDir::new().unwrap();
    let path = write_file(&dir, "src.bin", &pattern(30));

    let err = engine
        .upload_large(dir.path().join("missing.bin"), "obj", None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let err = engine.upload_large(&path, "obj", Some(0)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let err = engine.upload_large(&path, "", None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let err = engine.upload_large(dir.path(), "obj", None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    assert!(store.upload_ids().is_empty());
}

#[tokio::test]
async fn test_empty_file_multipart_has_one_empty_part() {
    let store = Arc::new(MemoryStore::new("bucket"));
    let engine = engine_with(&store, settings(10, 0));
    let dir = TempDir::new().unwrap();
    let path = write_file(&dir, "empty.bin", b"");

    let result = engine.upload_large(&path, "empty", None).await.unwrap();

    assert_eq!(result.parts, Some(1));
    assert_eq!(result.size, 0);
    assert_eq!(part_sizes(&store), vec![(1, 0)]);
    assert_eq!(store.object("empty").unwrap().len(), 0);
}

#[tokio::test]
async fn test_part_size_override() {
    let store = Arc::new(MemoryStore::new("bucket"));
    let engine = engine_with(&store, settings(100, 0));
    let dir = TempDir::new().unwrap();
    let path = write_file(&dir, "src.bin", &pattern(100));

    let result = engine.upload_large(&path, "obj", Some(30)).await.unwrap();

    assert_eq!(result.parts, Some(4));
    assert_eq!(part_sizes(&store), vec![(1, 30), (2, 30), (3, 30), (4, 10)]);
}

#[tokio::test]
async fn test_concurrent_uploader_orders_parts() {
    let store = Arc::new(MemoryStore::new("bucket"));
    let engine = engine_with(
        &store,
        TransferSettings {
            concurrency: 4,
            ..settings(64, 0)
        },
    );
    let dir = TempDir::new().unwrap();
    let data = pattern(1000);
    let path = write_file(&dir, "src.bin", &data);

    let result = engine.upload_large(&path, "obj", None).await.unwrap();

    assert_eq!(result.parts, Some(16));
    assert_eq!(completed_part_numbers(&store), vec![(1..=16).collect::<Vec<u32>>()]);
    let mut sizes = part_sizes(&store);
    sizes.sort();
    assert_eq!(sizes.iter().map(|(_, s)| s).sum::<u64>(), 1000);
    assert_eq!(sizes.last(), Some(&(16, 1000 - 15 * 64)));
    assert_eq!(store.object("obj").unwrap(), Bytes::from(data));
}

#[tokio::test]
async fn test_concurrent_uploader_aborts_on_failure() {
    let store = Arc::new(MemoryStore::new("bucket"));
    store.fail_part(3);
    let engine = engine_with(
        &store,
        TransferSettings {
            concurrency: 2,
            ..settings(10, 0)
        },
    );
    let dir = TempDir::new().unwrap();
    let path = write_file(&dir, "src.bin", &pattern(100));

    let err = engine.upload_large(&path, "obj", None).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::PartialUpload);
    let ids = store.upload_ids();
    assert_eq!(store.abort_calls(&ids[0]), 1);
    assert_eq!(store.upload_status(&ids[0]), Some(UploadStatus::Aborted));
    assert!(completed_part_numbers(&store).is_empty());
}

#[tokio::test]
async fn test_cancelled_upload_still_aborts() {
    let store = Arc::new(MemoryStore::new("bucket"));
    store.delay_parts(Duration::from_secs(30));
    let engine = engine_with(&store, settings(10, 0));
    let dir = TempDir::new().unwrap();
    let path = write_file(&dir, "src.bin", &pattern(30));

    let task = {
        let engine = engine.clone();
        let path = path.clone();
        tokio::spawn(async move { engine.upload_large(path, "obj", None).await })
    };

    tokio::time::timeout(Duration::from_secs(5), async {
        while store.upload_ids().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    task.abort();
    assert!(task.await.unwrap_err().is_cancelled());

    let upload_id = store.upload_ids()[0].clone();
    tokio::time::timeout(Duration::from_secs(5), async {
        while store.abort_calls(&upload_id) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    assert_eq!(store.abort_calls(&upload_id), 1);
    assert_eq!(store.upload_status(&upload_id), Some(UploadStatus::Aborted));
    assert!(completed_part_numbers(&store).is_empty());
}

#[tokio::test]
async fn test_timeout_during_slow_abort_still_aborts() {
    let mem = Arc::new(MemoryStore::new("bucket"));
    mem.fail_part(2);
    let store = SlowAbortStore {
        inner: mem.clone(),
        delay: Duration::from_millis(200),
    };
    let engine = TransferEngine::new(Arc::new(store), settings(10, 0));
    let dir = TempDir::new().unwrap();
    let path = write_file(&dir, "src.bin", &pattern(30));

    let outcome =
        tokio::time::timeout(Duration::from_millis(50), engine.upload_large(path, "obj", None))
            .await;
    assert!(outcome.is_err(), "upload finished before the abort delay");

    let upload_id = mem.upload_ids()[0].clone();
    tokio::time::timeout(Duration::from_secs(5), async {
        while mem.abort_calls(&upload_id) == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    assert_eq!(mem.open_uploads(), 0);
    assert_eq!(mem.abort_calls(&upload_id), 1);
    assert_eq!(mem.upload_status(&upload_id), Some(UploadStatus::Aborted));
    assert!(mem.object("obj").is_none());
}

#[tokio::test]
async fn test_round_trip_single_and_multipart() {
    let store = Arc::new(MemoryStore::new("bucket"));
    let engine = engine_with(&store, settings(16, 50));
    let dir = TempDir::new().unwrap();

    for (name, len) in [("small.bin", 20usize), ("large.bin", 200)] {
        let data = pattern(len);
        let path = write_file(&dir, name, &data);
        engine.upload_auto(&path, &format!("rt/{}", name)).await.unwrap();

        let downloaded = engine.download(&format!("rt/{}", name)).await.unwrap();
        assert_eq!(downloaded, Bytes::from(data));
    }

    let content = Bytes::from_static(b"in-memory content");
    let result = engine
        .upload(TransferSource::Bytes(content.clone()), "rt/mem.txt")
        .await
        .unwrap();
    assert_eq!(result.size, content.len() as u64);
    assert_eq!(engine.download("rt/mem.txt").await.unwrap(), content);
}

#[tokio::test]
async fn test_single_shot_missing_source_is_not_found() {
    let store = Arc::new(MemoryStore::new("bucket"));
    let engine = engine_with(&store, TransferSettings::default());
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("nope.txt");

    let err = engine.upload(missing.as_path(), "nope.txt").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let err = engine.upload_auto(&missing, "nope.txt").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    assert!(store.calls().is_empty());
}

#[tokio::test]
async fn test_download_missing_key() {
    let store = Arc::new(MemoryStore::new("bucket"));
    let engine = engine_with(&store, TransferSettings::default());

    let err = engine.download("missing/key").await.unwrap_err();
    let report = TransferReport::failure("missing/key", &err);

    assert!(!report.success);
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(err.kind().is_not_found());
    assert_eq!(report.error_kind, Some(ErrorKind::NotFound));
}

#[tokio::test]
async fn test_download_to_nested_path() {
    let store = Arc::new(MemoryStore::new("bucket"));
    store.insert("backups/db.sql", Bytes::from_static(b"SELECT 1;"));
    let engine = engine_with(&store, TransferSettings::default());
    let dir = TempDir::new().unwrap();
    let dest: PathBuf = dir.path().join("restore").join("today").join("db.sql");

    let result = engine.download_to("backups/db.sql", &dest).await.unwrap();

    assert_eq!(result.size, 9);
    assert_eq!(std::fs::read(Path::new(&dest)).unwrap(), b"SELECT 1;");
}

#[tokio::test]
async fn test_list_empty_bucket() {
    let store = Arc::new(MemoryStore::new("bucket"));
    let engine = engine_with(&store, TransferSettings::default());

    let objects = engine.list("").await.unwrap();
    assert!(objects.is_empty());
    assert_eq!(objects.len(), 0);
}

#[tokio::test]
async fn test_list_exhausts_all_pages() {
    let store = Arc::new(MemoryStore::new("bucket").with_max_page_size(4));
    for i in 0..25 {
        store.insert(format!("logs/{:03}.txt", i), Bytes::from(vec![b'x'; i + 1]));
    }
    store.insert("other/skip.txt", Bytes::from_static(b"x"));
    let engine = engine_with(&store, TransferSettings::default());

    let objects = engine.list("logs/").await.unwrap();

    assert_eq!(objects.len(), 25);
    let keys: Vec<&str> = objects.iter().map(|o| o.key.as_str()).collect();
    let mut sorted = keys.clone();
    sorted.sort();
    assert_eq!(keys, sorted);
    assert_eq!(objects[0].key, "logs/000.txt");
    assert_eq!(objects[24].size, 25);
    assert!(objects.iter().all(|o| o.last_modified.is_some()));
    assert_eq!(count_calls(&store, |c| matches!(c, StoreCall::List { .. })), 7);

    let everything = engine.list("").await.unwrap();
    assert_eq!(everything.len(), 26);
}

#[tokio::test]
async fn test_delete_then_list_excludes_key() {
    let store = Arc::new(MemoryStore::new("bucket"));
    let engine = engine_with(&store, TransferSettings::default());
    engine
        .upload(Bytes::from_static(b"one"), "folder/one.txt")
        .await
        .unwrap();
    engine
        .upload(Bytes::from_static(b"two"), "folder/two.txt")
        .await
        .unwrap();

    engine.delete("folder/one.txt").await.unwrap();
    let keys: Vec<String> = engine
        .list("folder/one")
        .await
        .unwrap()
        .into_iter()
        .map(|o| o.key)
        .collect();
    assert!(keys.is_empty());

    let remaining = engine.list("folder/").await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].key, "folder/two.txt");

    // Deleting again is still a success
    engine.delete("folder/one.txt").await.unwrap();
    assert_eq!(
        engine.delete("").await.unwrap_err().kind(),
        ErrorKind::Validation
    );
}

#[tokio::test]
async fn test_concurrent_operations_share_one_store() {
    let store = Arc::new(MemoryStore::new("bucket"));
    let engine = engine_with(&store, settings(8, 20));
    let dir = TempDir::new().unwrap();

    let mut tasks = Vec::new();
    for i in 0..8usize {
        let engine = engine.clone();
        let path = write_file(&dir, &format!("f{}.bin", i), &pattern(10 + i * 5));
        tasks.push(tokio::spawn(async move {
            engine.upload_auto(path, &format!("par/{}", i)).await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(engine.list("par/").await.unwrap().len(), 8);
    assert_eq!(store.open_uploads(), 0);
    for i in 0..8usize {
        assert_eq!(
            store.object(&format!("par/{}", i)).unwrap(),
            Bytes::from(pattern(10 + i * 5))
        );
    }
}
