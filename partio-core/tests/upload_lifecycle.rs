use async_trait::async_trait;
use bytes::Bytes;
use chrono::{Duration, Utc};
use partio_core::operations::CleanDangleUploadsOperationResult;
use partio_core::{
    Cancellation, ContentStore, Database, ErrorKind, InMemoryContentStore, MetadataQueries,
    MetadataStore, PartioError, Result, TransferStatus, UploadConfig, UploadOrchestrator,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Notify;
use ulid::Ulid;

/// In-memory backends whose n-th put (0-based) fails, or never finishes
struct FlakyContentStore {
    inner: InMemoryContentStore,
    puts: AtomicUsize,
    fail_put_at: Option<usize>,
    stall_put_at: Option<usize>,
    stalled: Notify,
}

#[async_trait]
impl ContentStore for FlakyContentStore {
    async fn list_available_backends(&self) -> Result<Vec<String>> {
        self.inner.list_available_backends().await
    }

    async fn put(&self, part_id: Ulid, backend: &str, data: Bytes) -> Result<()> {
        let attempt = self.puts.fetch_add(1, Ordering::SeqCst);
        if Some(attempt) == self.fail_put_at {
            return Err(PartioError::Io(std::io::Error::other("backend write failed")));
        }
        if Some(attempt) == self.stall_put_at {
            self.stalled.notify_one();
            return std::future::pending().await;
        }
        self.inner.put(part_id, backend, data).await
    }

    async fn get(&self, part_id: Ulid, backend: &str) -> Result<Bytes> {
        self.inner.get(part_id, backend).await
    }

    async fn delete(&self, part_id: Ulid, backend: &str) -> Result<()> {
        self.inner.delete(part_id, backend).await
    }
}

struct Harness {
    _dir: tempfile::TempDir,
    metadata: MetadataStore,
    content: Arc<FlakyContentStore>,
    orchestrator: UploadOrchestrator,
}

fn harness(part_count: usize, backend_count: usize, fail_put_at: Option<usize>) -> Harness {
    harness_with(part_count, backend_count, fail_put_at, None)
}

fn harness_with(
    part_count: usize,
    backend_count: usize,
    fail_put_at: Option<usize>,
    stall_put_at: Option<usize>,
) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let database = Database::open(dir.path().join("meta.db")).unwrap();
    let addresses: Vec<String> = (0..backend_count)
        .map(|index| format!("http://localhost:{}", 8080 + index))
        .collect();

    let content = Arc::new(FlakyContentStore {
        inner: InMemoryContentStore::new(addresses),
        puts: AtomicUsize::new(0),
        fail_put_at,
        stall_put_at,
        stalled: Notify::new(),
    });

    let config = UploadConfig {
        part_count,
        dangling_ttl: std::time::Duration::from_secs(24 * 60 * 60),
    };

    let orchestrator = UploadOrchestrator::new(
        database.clone(),
        content.clone(),
        config,
        tracing::info_span!("uploads_test"),
    )
    .unwrap();

    Harness {
        _dir: dir,
        metadata: MetadataStore::new(database),
        content,
        orchestrator,
    }
}

fn sample(size: usize) -> Vec<u8> {
    (0..size).map(|index| (index % 251) as u8).collect()
}

#[tokio::test]
async fn test_round_trip_reproduces_content() {
    let cancel = Cancellation::never();

    for size in [0usize, 1, 6, 10, 1_003] {
        let h = harness(6, 3, None);
        let data = sample(size);

        let upload = h
            .orchestrator
            .create_upload(size as u64, "data.bin", &mut data.as_slice(), &cancel)
            .await
            .unwrap();
        assert_eq!(upload.status, TransferStatus::Done);
        assert_eq!(upload.size, size as u64);

        let mut output = Vec::new();
        let read = h
            .orchestrator
            .read_upload(upload.id, &mut output, &cancel)
            .await
            .unwrap();

        assert_eq!(output, data, "round trip for size {}", size);
        assert_eq!(read.parts_read, 6);
        assert_eq!(read.bytes_written, size as u64);
    }
}

#[tokio::test]
async fn test_persisted_parts_satisfy_invariants() {
    let h = harness(6, 4, None);
    let data = sample(1_001);

    let upload = h
        .orchestrator
        .create_upload(1_001, "data.bin", &mut data.as_slice(), &Cancellation::never())
        .await
        .unwrap();

    let parts = h.metadata.list_parts(upload.id).unwrap();
    assert_eq!(parts.iter().map(|part| part.size).sum::<u64>(), upload.size);

    let numbers: Vec<u32> = parts.iter().map(|part| part.number).collect();
    assert_eq!(numbers, (0..6).collect::<Vec<u32>>());

    assert!(parts.iter().all(|part| part.status == TransferStatus::Done));
    assert!(parts.iter().all(|part| part.upload_id == upload.id));

    let stored = h.metadata.get_upload(upload.id).unwrap().unwrap();
    assert_eq!(stored.status, TransferStatus::Done);
}

#[tokio::test]
async fn test_no_backends_fails_without_side_effects() {
    let h = harness(6, 0, None);
    let data = sample(10);

    let error = h
        .orchestrator
        .create_upload(10, "data.bin", &mut data.as_slice(), &Cancellation::never())
        .await
        .unwrap_err();

    assert_eq!(error.kind(), ErrorKind::BackendUnavailable);
    let far_future = Utc::now() + Duration::days(365);
    assert!(h.metadata.list_stale_parts(far_future).unwrap().is_empty());
}

#[tokio::test]
async fn test_failed_part_then_cleanup_removes_whole_upload() {
    let h = harness(3, 3, Some(1));
    let data = sample(10);
    let cancel = Cancellation::never();

    let error = h
        .orchestrator
        .create_upload(10, "data.bin", &mut data.as_slice(), &cancel)
        .await
        .unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Io);

    let now = Utc::now();
    let stale = h.metadata.list_stale_parts(now + Duration::hours(25)).unwrap();
    let upload_id = stale[0].upload_id;

    let parts = h.metadata.list_parts(upload_id).unwrap();
    let statuses: Vec<TransferStatus> = parts.iter().map(|part| part.status).collect();
    assert_eq!(
        statuses,
        vec![
            TransferStatus::Done,
            TransferStatus::InProgress,
            TransferStatus::InProgress
        ]
    );
    assert_eq!(
        h.metadata.get_upload(upload_id).unwrap().unwrap().status,
        TransferStatus::InProgress
    );
    assert!(h.content.inner.contains(parts[0].id, &parts[0].backend).await);

    // Younger than the TTL: nothing happens
    let early = h
        .orchestrator
        .clean_dangle_uploads(now + Duration::hours(1), &cancel)
        .await
        .unwrap();
    assert_eq!(early.uploads_deleted, 0);
    assert_eq!(h.metadata.list_parts(upload_id).unwrap().len(), 3);

    let cleaned = h
        .orchestrator
        .clean_dangle_uploads(now + Duration::hours(25), &cancel)
        .await
        .unwrap();
    assert_eq!(cleaned.uploads_deleted, 1);
    assert_eq!(cleaned.stale_parts, 2);

    assert!(h.metadata.get_upload(upload_id).unwrap().is_none());
    assert!(h.metadata.list_parts(upload_id).unwrap().is_empty());
    assert!(!h.content.inner.contains(parts[0].id, &parts[0].backend).await);
    assert_eq!(h.content.inner.blob_count().await, 0);

    let again = h
        .orchestrator
        .clean_dangle_uploads(now + Duration::hours(25), &cancel)
        .await
        .unwrap();
    assert_eq!(again, CleanDangleUploadsOperationResult::default());
}

#[tokio::test]
async fn test_cleanup_leaves_completed_uploads() {
    let h = harness(3, 3, Some(4));
    let cancel = Cancellation::never();

    let good = sample(30);
    let done = h
        .orchestrator
        .create_upload(30, "good.bin", &mut good.as_slice(), &cancel)
        .await
        .unwrap();

    let bad = sample(12);
    h.orchestrator
        .create_upload(12, "bad.bin", &mut bad.as_slice(), &cancel)
        .await
        .unwrap_err();

    let result = h
        .orchestrator
        .clean_dangle_uploads(Utc::now() + Duration::hours(48), &cancel)
        .await
        .unwrap();
    assert_eq!(result.uploads_deleted, 1);

    let mut output = Vec::new();
    h.orchestrator
        .read_upload(done.id, &mut output, &cancel)
        .await
        .unwrap();
    assert_eq!(output, good);
}

#[tokio::test]
async fn test_read_unknown_upload_is_not_found() {
    let h = harness(6, 2, None);
    let mut output = Vec::new();

    let error = h
        .orchestrator
        .read_upload(Ulid::new(), &mut output, &Cancellation::never())
        .await
        .unwrap_err();

    assert_eq!(error.kind(), ErrorKind::NotFound);
    assert!(output.is_empty());
}

#[tokio::test]
async fn test_read_keeps_bytes_written_before_failure() {
    let h = harness(3, 3, None);
    let data = sample(9);
    let cancel = Cancellation::never();

    let upload = h
        .orchestrator
        .create_upload(9, "data.bin", &mut data.as_slice(), &cancel)
        .await
        .unwrap();

    let parts = h.metadata.list_parts(upload.id).unwrap();
    h.content
        .delete(parts[1].id, &parts[1].backend)
        .await
        .unwrap();

    let mut output = Vec::new();
    let error = h
        .orchestrator
        .read_upload(upload.id, &mut output, &cancel)
        .await
        .unwrap_err();

    assert_eq!(error.kind(), ErrorKind::NotFound);
    assert_eq!(output, data[..3].to_vec());
}

#[tokio::test]
async fn test_short_stream_fails_part_transfer() {
    let h = harness(2, 2, None);
    let data = sample(5);

    let error = h
        .orchestrator
        .create_upload(10, "data.bin", &mut data.as_slice(), &Cancellation::never())
        .await
        .unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Io);

    let stale = h
        .metadata
        .list_stale_parts(Utc::now() + Duration::hours(25))
        .unwrap();
    assert_eq!(stale.len(), 1);
    assert_eq!(stale[0].number, 1);
}

#[tokio::test]
async fn test_invalid_arguments_rejected() {
    let h = harness(2, 2, None);
    let data = sample(4);

    let error = h
        .orchestrator
        .create_upload(4, "   ", &mut data.as_slice(), &Cancellation::never())
        .await
        .unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Validation);
}

#[tokio::test]
async fn test_cancelled_before_start() {
    let h = harness(2, 2, None);
    let data = sample(4);
    let (handle, cancel) = Cancellation::new();
    handle.cancel();

    let error = h
        .orchestrator
        .create_upload(4, "data.bin", &mut data.as_slice(), &cancel)
        .await
        .unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Cancelled);

    let error = h
        .orchestrator
        .clean_dangle_uploads(Utc::now(), &cancel)
        .await
        .unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Cancelled);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_uploads_are_isolated() {
    let h = harness(6, 3, None);
    let orchestrator = Arc::new(h.orchestrator.clone());

    let mut tasks = Vec::new();
    for seed in 0..4u8 {
        let orchestrator = orchestrator.clone();
        tasks.push(tokio::spawn(async move {
            let data: Vec<u8> = (0..600).map(|index| (index as u8).wrapping_mul(seed + 1)).collect();
            let upload = orchestrator
                .create_upload(600, format!("file-{}", seed), &mut data.as_slice(), &Cancellation::never())
                .await
                .unwrap();
            (upload, data)
        }));
    }

    let mut ids = BTreeSet::new();
    for task in tasks {
        let (upload, data) = task.await.unwrap();
        ids.insert(upload.id);

        let parts = h.metadata.list_parts(upload.id).unwrap();
        assert_eq!(parts.len(), 6);
        assert!(parts.iter().all(|part| part.upload_id == upload.id));

        let mut output = Vec::new();
        orchestrator
            .read_upload(upload.id, &mut output, &Cancellation::never())
            .await
            .unwrap();
        assert_eq!(output, data);
    }
    assert_eq!(ids.len(), 4);
}

#[tokio::test]
async fn test_cancel_during_transfer_leaves_upload_for_cleanup() {
    let h = harness_with(3, 3, None, Some(1));
    let (handle, cancel) = Cancellation::new();

    let orchestrator = h.orchestrator.clone();
    let transfer = tokio::spawn(async move {
        let data = sample(9);
        orchestrator
            .create_upload(9, "data.bin", &mut data.as_slice(), &cancel)
            .await
    });

    // Part 1 is now in flight on its backend.
    h.content.stalled.notified().await;
    handle.cancel();

    let error = transfer.await.unwrap().unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Cancelled);

    let pending = h
        .metadata
        .list_stale_parts(Utc::now() + Duration::hours(1))
        .unwrap();
    assert_eq!(pending.len(), 2);
    let upload_id = pending[0].upload_id;

    let parts = h.metadata.list_parts(upload_id).unwrap();
    let statuses: Vec<TransferStatus> = parts.iter().map(|part| part.status).collect();
    assert_eq!(
        statuses,
        vec![
            TransferStatus::Done,
            TransferStatus::InProgress,
            TransferStatus::InProgress
        ]
    );
    assert!(h.content.inner.contains(parts[0].id, &parts[0].backend).await);

    let upload = h.metadata.get_upload(upload_id).unwrap().unwrap();
    assert_eq!(upload.status, TransferStatus::InProgress);

    let cleaned = h
        .orchestrator
        .clean_dangle_uploads(Utc::now() + Duration::hours(25), &Cancellation::never())
        .await
        .unwrap();
    assert_eq!(cleaned.uploads_deleted, 1);
    assert_eq!(cleaned.stale_parts, 2);
    assert_eq!(cleaned.blobs_removed, 3);

    assert!(h.metadata.get_upload(upload_id).unwrap().is_none());
    assert!(h.metadata.list_parts(upload_id).unwrap().is_empty());
    assert_eq!(h.content.inner.blob_count().await, 0);
}

#[tokio::test]
async fn test_cleanup_stops_on_removed_backend() {
    let h = harness(2, 2, Some(1));
    let data = sample(4);

    h.orchestrator
        .create_upload(4, "data.bin", &mut data.as_slice(), &Cancellation::never())
        .await
        .unwrap_err();

    let pending = h
        .metadata
        .list_stale_parts(Utc::now() + Duration::hours(1))
        .unwrap();
    assert_eq!(pending.len(), 1);
    let upload_id = pending[0].upload_id;

    assert!(h.content.inner.remove_backend(&pending[0].backend).await);

    let error = h
        .orchestrator
        .clean_dangle_uploads(Utc::now() + Duration::hours(25), &Cancellation::never())
        .await
        .unwrap_err();
    assert_eq!(error.kind(), ErrorKind::NotFound);
    assert!(error.to_string().contains(&upload_id.to_string()));

    // Nothing is forgotten while a blob could not be removed.
    assert!(h.metadata.get_upload(upload_id).unwrap().is_some());
    assert_eq!(h.metadata.list_parts(upload_id).unwrap().len(), 2);
}

#[tokio::test]
async fn test_unrepresentable_ttl_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let database = Database::open(dir.path().join("meta.db")).unwrap();
    let config = UploadConfig {
        part_count: 6,
        dangling_ttl: std::time::Duration::from_secs(10_000_000_000_000),
    };

    let error = UploadOrchestrator::new(
        database,
        Arc::new(InMemoryContentStore::new(["http://localhost:8080"])),
        config,
        tracing::info_span!("uploads_test"),
    )
    .err()
    .unwrap();
    assert_eq!(error.kind(), ErrorKind::Config);
}
