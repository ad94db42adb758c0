//! Bounded fetcher: a semaphore-gated worker pool streaming remote files to
//! scratch storage and yielding results in completion order

use futures_util::StreamExt;
use log::debug;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;

use crate::config::scratch_file_name;
use crate::error::Error;
use crate::session::FileRef;
use crate::transport::Transport;

/// Write buffer size for downloads (2 MB) - reduces I/O operations
const WRITE_BUFFER_SIZE: usize = 2 * 1024 * 1024;

/// A completed download. Ownership of the local file passes to the archive
/// assembler on append.
#[derive(Debug)]
pub(crate) struct FetchedFile {
    pub file_ref: FileRef,
    pub local_path: PathBuf,
    pub actual_size: u64,
}

/// Handle to a running fetch pool. `results` yields completions as they
/// happen; `driver` finishes once every worker task has been reaped.
pub(crate) struct FetchPool {
    pub results: mpsc::Receiver<Result<FetchedFile, Error>>,
    pub driver: JoinHandle<()>,
}

/// Spawn up to `limit` concurrent download workers over `refs`. The first
/// failing worker raises `failed` so no further transfers are admitted;
/// `cancelled` stops admissions and makes in-flight workers bail between
/// chunks.
pub(crate) fn spawn_pool<T: Transport>(
    transport: Arc<T>,
    refs: Vec<FileRef>,
    scratch_dir: PathBuf,
    limit: usize,
    cancelled: Arc<AtomicBool>,
) -> FetchPool {
    let (tx, rx) = mpsc::channel(limit.max(1));

    let driver = tokio::spawn(async move {
        let semaphore = Arc::new(Semaphore::new(limit.max(1)));
        let failed = Arc::new(AtomicBool::new(false));
        let mut handles = Vec::with_capacity(refs.len());

        for file_ref in refs {
            if cancelled.load(Ordering::SeqCst) || failed.load(Ordering::SeqCst) {
                break;
            }
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };

            let transport = transport.clone();
            let scratch_dir = scratch_dir.clone();
            let cancelled = cancelled.clone();
            let failed = failed.clone();
            let tx = tx.clone();

            handles.push(tokio::spawn(async move {
                let _permit = permit;
                if cancelled.load(Ordering::SeqCst) || failed.load(Ordering::SeqCst) {
                    return;
                }
                match fetch_one(transport.as_ref(), &file_ref, &scratch_dir, &cancelled).await {
                    Ok(fetched) => {
                        let _ = tx.send(Ok(fetched)).await;
                    }
                    Err(e) => {
                        failed.store(true, Ordering::SeqCst);
                        let _ = tx.send(Err(e)).await;
                    }
                }
            }));
        }

        for handle in handles {
            let _ = handle.await;
        }
    });

    FetchPool {
        results: rx,
        driver,
    }
}

/// Stream one remote file into the scratch directory and verify the
/// transferred size against the declared one.
async fn fetch_one<T: Transport>(
    transport: &T,
    file_ref: &FileRef,
    scratch_dir: &Path,
    cancelled: &AtomicBool,
) -> Result<FetchedFile, Error> {
    let local_path = scratch_dir.join(scratch_file_name(&file_ref.remote_id));
    debug!(
        "fetch_start: {} name={} declared={}",
        file_ref.remote_id, file_ref.declared_name, file_ref.declared_size
    );

    let mut stream = transport.fetch(&file_ref.remote_id).await?;
    let mut file = File::create(&local_path).await?;
    let mut write_buffer = Vec::with_capacity(WRITE_BUFFER_SIZE);
    let mut transferred: u64 = 0;

    while let Some(chunk_result) = stream.next().await {
        if cancelled.load(Ordering::SeqCst) {
            drop(file);
            let _ = tokio::fs::remove_file(&local_path).await;
            return Err(Error::Cancelled);
        }

        let chunk = chunk_result.map_err(|e| {
            Error::Transport(format!(
                "failed to read chunk of {}: {}",
                file_ref.declared_name, e
            ))
        })?;
        transferred += chunk.len() as u64;

        // An oversize body can never match the declared size; abort the
        // stream as soon as that is known.
        if transferred > file_ref.declared_size {
            drop(file);
            let _ = tokio::fs::remove_file(&local_path).await;
            return Err(Error::SizeMismatch {
                name: file_ref.declared_name.clone(),
                declared: file_ref.declared_size,
                actual: transferred,
            });
        }

        write_buffer.extend_from_slice(&chunk);
        if write_buffer.len() >= WRITE_BUFFER_SIZE {
            file.write_all(&write_buffer).await?;
            write_buffer.clear();
        }
    }

    if !write_buffer.is_empty() {
        file.write_all(&write_buffer).await?;
    }
    file.flush().await?;

    if transferred != file_ref.declared_size {
        drop(file);
        let _ = tokio::fs::remove_file(&local_path).await;
        return Err(Error::SizeMismatch {
            name: file_ref.declared_name.clone(),
            declared: file_ref.declared_size,
            actual: transferred,
        });
    }

    debug!("fetch_done: {} bytes={}", file_ref.remote_id, transferred);
    Ok(FetchedFile {
        file_ref: file_ref.clone(),
        local_path,
        actual_size: transferred,
    })
}
