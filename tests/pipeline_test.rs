//! End-to-end pipeline tests over an instrumented in-memory transport.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

use quickzip::{ByteStream, Error, FileRef, SessionStatus, Transport, ZipConfig, ZipService};

/// Counts concurrent fetch streams and captures delivered archives. Each
/// fetch yields its body in small delayed chunks so cancellation and
/// concurrency windows are observable.
#[derive(Default)]
struct FakeTransport {
    files: HashMap<String, Vec<u8>>,
    /// remote_ids whose fetch fails outright
    broken: Vec<String>,
    chunk_delay: Duration,
    fetch_calls: AtomicUsize,
    active_fetches: Arc<AtomicUsize>,
    max_active_fetches: Arc<AtomicUsize>,
    first_fetch_started: Arc<Notify>,
    delivered: Mutex<Vec<(i64, String, Vec<u8>)>>,
    texts: Mutex<Vec<String>>,
}

impl FakeTransport {
    fn with_files(entries: &[(&str, &[u8])]) -> Self {
        FakeTransport {
            files: entries
                .iter()
                .map(|(id, body)| (id.to_string(), body.to_vec()))
                .collect(),
            chunk_delay: Duration::from_millis(5),
            ..FakeTransport::default()
        }
    }

    fn delivered_archives(&self) -> Vec<(i64, String, Vec<u8>)> {
        self.delivered.lock().unwrap().clone()
    }
}

/// Decrements the active-fetch gauge when the stream is dropped.
struct ActiveGuard(Arc<AtomicUsize>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn fetch(&self, remote_id: &str) -> Result<ByteStream, Error> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        // notify_one stores a permit, so a waiter that registers late still
        // observes the first fetch
        self.first_fetch_started.notify_one();

        if self.broken.iter().any(|id| id == remote_id) {
            return Err(Error::Transport(format!("{} is unreachable", remote_id)));
        }
        let body = self
            .files
            .get(remote_id)
            .cloned()
            .ok_or_else(|| Error::Transport(format!("{} not found", remote_id)))?;

        let active = self.active_fetches.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active_fetches.fetch_max(active, Ordering::SeqCst);
        let guard = ActiveGuard(self.active_fetches.clone());

        let delay = self.chunk_delay;
        let chunks: Vec<Bytes> = body.chunks(32).map(Bytes::copy_from_slice).collect();
        let stream = futures_util::stream::iter(chunks).then(move |chunk| {
            // the guard rides in the closure so it drops with the stream
            let _hold = &guard;
            async move {
                tokio::time::sleep(delay).await;
                Ok(chunk)
            }
        });
        Ok(Box::pin(stream))
    }

    async fn deliver_document(
        &self,
        owner_id: i64,
        local_path: &Path,
        caption: &str,
    ) -> Result<(), Error> {
        // Copy the bytes out now; cleanup deletes the file right after.
        let bytes = std::fs::read(local_path)?;
        self.delivered
            .lock()
            .unwrap()
            .push((owner_id, caption.to_string(), bytes));
        Ok(())
    }

    async fn send_or_edit_text(&self, _owner_id: i64, text: &str) -> Result<(), Error> {
        self.texts.lock().unwrap().push(text.to_string());
        Ok(())
    }
}

fn config_in(dir: &Path) -> ZipConfig {
    ZipConfig {
        max_concurrency: 3,
        size_cap_bytes: 1000,
        storage_root: dir.to_path_buf(),
    }
}

fn file_ref(id: &str, size: u64, name: &str) -> FileRef {
    FileRef {
        remote_id: id.to_string(),
        declared_size: size,
        declared_name: name.to_string(),
    }
}

fn read_archive(bytes: &[u8]) -> Vec<(String, Vec<u8>)> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes.to_vec())).unwrap();
    let mut entries = Vec::new();
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index).unwrap();
        let mut content = Vec::new();
        entry.read_to_end(&mut content).unwrap();
        entries.push((entry.name().to_string(), content));
    }
    entries.sort();
    entries
}

#[tokio::test]
async fn end_to_end_two_files_are_zipped_and_delivered() {
    let dir = tempfile::tempdir().unwrap();
    let body_a = vec![b'a'; 100];
    let body_b = vec![b'b'; 200];
    let transport = FakeTransport::with_files(&[("A", &body_a), ("B", &body_b)]);
    let service = ZipService::new(config_in(dir.path()), transport);

    service.open(1).unwrap();
    service.add_file(1, file_ref("A", 100, "a.bin")).unwrap();
    let totals = service.add_file(1, file_ref("B", 200, "b.bin")).unwrap();
    assert_eq!(totals.total_declared_size, 300);

    let summary = service.finalize(1, "out").await.unwrap();
    assert_eq!(summary.entry_count, 2);
    assert!(summary.archive_size > 0);

    // session closed, scratch gone
    assert_eq!(service.session_status(1), None);
    assert!(!dir.path().join("1").exists());
}

#[tokio::test]
async fn delivered_archive_contains_the_original_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let body_a = vec![b'a'; 100];
    let body_b = vec![b'b'; 200];
    let transport = Arc::new(FakeTransport::with_files(&[("A", &body_a), ("B", &body_b)]));
    let service = ZipService::new(config_in(dir.path()), ArcTransport(transport.clone()));

    service.open(1).unwrap();
    service.add_file(1, file_ref("A", 100, "a.bin")).unwrap();
    service.add_file(1, file_ref("B", 200, "b.bin")).unwrap();
    service.finalize(1, "out").await.unwrap();

    let delivered = transport.delivered_archives();
    assert_eq!(delivered.len(), 1);
    let (owner, caption, bytes) = &delivered[0];
    assert_eq!(*owner, 1);
    assert!(caption.starts_with("Done! Zipped 2 files"));

    let entries = read_archive(bytes);
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0], ("a.bin".to_string(), body_a));
    assert_eq!(entries[1], ("b.bin".to_string(), body_b));
    assert_eq!(entries.iter().map(|(_, c)| c.len()).sum::<usize>(), 300);
}

#[tokio::test]
async fn empty_session_fails_without_creating_scratch() {
    let dir = tempfile::tempdir().unwrap();
    let transport = FakeTransport::with_files(&[]);
    let service = ZipService::new(config_in(dir.path()), transport);

    service.open(1).unwrap();
    let err = service.finalize(1, "out").await.unwrap_err();
    assert!(matches!(err, Error::EmptySession(1)));
    assert!(!dir.path().join("1").exists());
    // the session is still open for more adds
    assert_eq!(service.session_status(1), Some(SessionStatus::Open));
}

#[tokio::test]
async fn missing_archive_name_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let transport = FakeTransport::with_files(&[]);
    let service = ZipService::new(config_in(dir.path()), transport);

    service.open(1).unwrap();
    service.add_file(1, file_ref("A", 10, "a")).unwrap();
    let err = service.finalize(1, "   ").await.unwrap_err();
    assert!(matches!(err, Error::MissingName));
    assert_eq!(service.session_status(1), Some(SessionStatus::Open));
}

#[tokio::test]
async fn over_cap_session_fails_before_any_fetch() {
    let dir = tempfile::tempdir().unwrap();
    let transport = Arc::new(FakeTransport::with_files(&[]));
    let service = ZipService::new(config_in(dir.path()), ArcTransport(transport.clone()));

    service.open(1).unwrap();
    service.add_file(1, file_ref("A", 600, "a")).unwrap();
    service.add_file(1, file_ref("B", 600, "b")).unwrap();

    let err = service.finalize(1, "out").await.unwrap_err();
    assert!(matches!(
        err,
        Error::SizeExceeded {
            declared: 1200,
            cap: 1000
        }
    ));
    assert_eq!(transport.fetch_calls.load(Ordering::SeqCst), 0);
    assert!(!dir.path().join("1").exists());

    // recovery requires an explicit cancel-and-restart
    assert_eq!(service.session_status(1), Some(SessionStatus::Finalizing));
    assert!(service.cancel(1));
    assert_eq!(service.session_status(1), None);
    service.open(1).unwrap();
}

#[tokio::test]
async fn concurrency_limit_is_never_exceeded() {
    let dir = tempfile::tempdir().unwrap();
    let bodies: Vec<Vec<u8>> = (0..5).map(|i| vec![i as u8; 96]).collect();
    let entries: Vec<(&str, &[u8])> = vec![
        ("f0", &bodies[0]),
        ("f1", &bodies[1]),
        ("f2", &bodies[2]),
        ("f3", &bodies[3]),
        ("f4", &bodies[4]),
    ];
    let transport = Arc::new(FakeTransport::with_files(&entries));
    let config = ZipConfig {
        max_concurrency: 2,
        size_cap_bytes: 10_000,
        storage_root: dir.path().to_path_buf(),
    };
    let service = ZipService::new(config, ArcTransport(transport.clone()));

    service.open(1).unwrap();
    for index in 0..5 {
        service
            .add_file(1, file_ref(&format!("f{index}"), 96, &format!("f{index}.bin")))
            .unwrap();
    }
    let summary = service.finalize(1, "out").await.unwrap();
    assert_eq!(summary.entry_count, 5);
    assert_eq!(transport.fetch_calls.load(Ordering::SeqCst), 5);
    assert!(transport.max_active_fetches.load(Ordering::SeqCst) <= 2);
}

#[tokio::test]
async fn cancel_mid_download_cleans_up_everything() {
    let dir = tempfile::tempdir().unwrap();
    let big = vec![b'x'; 4096];
    let mut transport = FakeTransport::with_files(&[("A", &big), ("B", &big)]);
    // slow chunks so the cancel lands while both fetches are in flight
    transport.chunk_delay = Duration::from_millis(50);
    let transport = Arc::new(transport);
    let config = ZipConfig {
        max_concurrency: 2,
        size_cap_bytes: 100_000,
        storage_root: dir.path().to_path_buf(),
    };
    let service = Arc::new(ZipService::new(config, ArcTransport(transport.clone())));

    service.open(1).unwrap();
    service.add_file(1, file_ref("A", 4096, "a.bin")).unwrap();
    service.add_file(1, file_ref("B", 4096, "b.bin")).unwrap();

    let started = transport.first_fetch_started.clone();
    let wait_for_start = started.notified();
    let runner = {
        let service = service.clone();
        tokio::spawn(async move { service.finalize(1, "out").await })
    };

    wait_for_start.await;
    assert!(service.cancel(1));

    let result = runner.await.unwrap();
    assert!(matches!(result, Err(Error::Cancelled)));
    assert!(transport.delivered_archives().is_empty());
    assert_eq!(service.session_status(1), None);
    assert!(!dir.path().join("1").exists());
    // workers drained: the active-fetch gauge returned to zero
    assert_eq!(transport.active_fetches.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn duplicate_declared_names_get_distinct_entries() {
    let dir = tempfile::tempdir().unwrap();
    let body_a = b"alpha contents".to_vec();
    let body_b = b"bravo contents!".to_vec();
    let transport = Arc::new(FakeTransport::with_files(&[("A", &body_a), ("B", &body_b)]));
    let service = ZipService::new(config_in(dir.path()), ArcTransport(transport.clone()));

    service.open(1).unwrap();
    service
        .add_file(1, file_ref("A", body_a.len() as u64, "report.txt"))
        .unwrap();
    service
        .add_file(1, file_ref("B", body_b.len() as u64, "report.txt"))
        .unwrap();
    service.finalize(1, "out").await.unwrap();

    let delivered = transport.delivered_archives();
    let entries = read_archive(&delivered[0].2);
    assert_eq!(entries.len(), 2);
    let names: Vec<&str> = entries.iter().map(|(name, _)| name.as_str()).collect();
    assert_eq!(names, vec!["report-1.txt", "report.txt"]);
    // both payloads intact, regardless of which name each landed under
    let mut contents: Vec<Vec<u8>> = entries.into_iter().map(|(_, content)| content).collect();
    contents.sort();
    let mut expected = vec![body_a, body_b];
    expected.sort();
    assert_eq!(contents, expected);
}

#[tokio::test]
async fn first_failing_fetch_aborts_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let body = vec![b'a'; 64];
    let mut transport = FakeTransport::with_files(&[("A", &body), ("C", &body)]);
    transport.broken = vec!["B".to_string()];
    let transport = Arc::new(transport);
    let service = ZipService::new(config_in(dir.path()), ArcTransport(transport.clone()));

    service.open(1).unwrap();
    service.add_file(1, file_ref("A", 64, "a.bin")).unwrap();
    service.add_file(1, file_ref("B", 64, "b.bin")).unwrap();
    service.add_file(1, file_ref("C", 64, "c.bin")).unwrap();

    let err = service.finalize(1, "out").await.unwrap_err();
    assert!(matches!(err, Error::Transport(_)));
    assert!(transport.delivered_archives().is_empty());
    assert_eq!(service.session_status(1), None);
    assert!(!dir.path().join("1").exists());
    // the user is told to retry
    let texts = transport.texts.lock().unwrap();
    assert!(texts.last().unwrap().contains("Please retry"));
}

#[tokio::test]
async fn short_body_fails_with_size_mismatch() {
    let dir = tempfile::tempdir().unwrap();
    let body = vec![b'a'; 40];
    let transport = Arc::new(FakeTransport::with_files(&[("A", &body)]));
    let service = ZipService::new(config_in(dir.path()), ArcTransport(transport.clone()));

    service.open(1).unwrap();
    // declares more bytes than the transport will produce
    service.add_file(1, file_ref("A", 64, "a.bin")).unwrap();

    let err = service.finalize(1, "out").await.unwrap_err();
    match err {
        Error::SizeMismatch {
            declared, actual, ..
        } => {
            assert_eq!(declared, 64);
            assert_eq!(actual, 40);
        }
        other => panic!("expected SizeMismatch, got {other:?}"),
    }
    assert!(transport.delivered_archives().is_empty());
    assert!(!dir.path().join("1").exists());
}

/// Newtype so tests can keep their own `Arc` to the instrumented transport.
struct ArcTransport(Arc<FakeTransport>);

#[async_trait]
impl Transport for ArcTransport {
    async fn fetch(&self, remote_id: &str) -> Result<ByteStream, Error> {
        self.0.fetch(remote_id).await
    }

    async fn deliver_document(
        &self,
        owner_id: i64,
        local_path: &Path,
        caption: &str,
    ) -> Result<(), Error> {
        self.0.deliver_document(owner_id, local_path, caption).await
    }

    async fn send_or_edit_text(&self, owner_id: i64, text: &str) -> Result<(), Error> {
        self.0.send_or_edit_text(owner_id, text).await
    }
}
