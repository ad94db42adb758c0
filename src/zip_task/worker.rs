//! Zip task orchestrator
//!
//! One state machine per finalize request: validate the declared total,
//! drive the bounded fetch pool, serialize completions into the archive
//! through the single consumer loop, deliver, and clean up on every path.

use log::{error, info, warn};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use super::archive::ZipAssembler;
use super::fetch::{self, FetchPool};
use super::finishing;
use super::progress::ProgressReporter;
use super::types::{ZipSummary, ZipTaskStatus};
use crate::config::ZipConfig;
use crate::error::Error;
use crate::session::{FileRef, SessionSnapshot};
use crate::transport::Transport;

/// Run one finalize request end to end. Cleanup of the scratch directory
/// executes on every exit path before the outcome is surfaced; closing the
/// session is the caller's half of the guarantee.
pub(crate) async fn run_zip_task<T: Transport>(
    transport: Arc<T>,
    config: &ZipConfig,
    snapshot: SessionSnapshot,
    archive_name: &str,
    cancelled: Arc<AtomicBool>,
) -> Result<ZipSummary, Error> {
    let owner_id = snapshot.owner_id;
    info!(
        "zip_task_start: {} files={} declared_bytes={} archive={}",
        owner_id,
        snapshot.file_refs.len(),
        snapshot.total_declared_size,
        archive_name
    );

    set_status(owner_id, ZipTaskStatus::Validating);
    if snapshot.total_declared_size > config.size_cap_bytes {
        warn!(
            "zip_task_size_exceeded: {} declared={} cap={}",
            owner_id, snapshot.total_declared_size, config.size_cap_bytes
        );
        // No scratch exists yet and no fetch was started; the session stays
        // finalizing until the owner cancels.
        return Err(Error::SizeExceeded {
            declared: snapshot.total_declared_size,
            cap: config.size_cap_bytes,
        });
    }

    let scratch_dir = config.scratch_dir(owner_id);
    tokio::fs::create_dir_all(&scratch_dir).await?;

    let started = Instant::now();
    let result = build_and_deliver(
        transport,
        config,
        &snapshot,
        archive_name,
        &scratch_dir,
        &cancelled,
        started,
    )
    .await;

    set_status(owner_id, ZipTaskStatus::Cleanup);
    finishing::remove_scratch(owner_id, &scratch_dir).await;

    match &result {
        Ok(summary) => {
            set_status(owner_id, ZipTaskStatus::Done);
            info!(
                "zip_task_done: {} entries={} archive_bytes={} elapsed_ms={}",
                owner_id,
                summary.entry_count,
                summary.archive_size,
                summary.elapsed.as_millis()
            );
        }
        Err(Error::Cancelled) => {
            set_status(owner_id, ZipTaskStatus::Cancelled);
            info!("zip_task_cancelled: {}", owner_id);
        }
        Err(e) => {
            set_status(owner_id, ZipTaskStatus::Error);
            error!("zip_task_failed: {} error={}", owner_id, e);
        }
    }
    result
}

fn set_status(owner_id: i64, status: ZipTaskStatus) {
    info!("zip_status: {} -> {}", owner_id, status);
}

async fn build_and_deliver<T: Transport>(
    transport: Arc<T>,
    config: &ZipConfig,
    snapshot: &SessionSnapshot,
    archive_name: &str,
    scratch_dir: &Path,
    cancelled: &Arc<AtomicBool>,
    started: Instant,
) -> Result<ZipSummary, Error> {
    let owner_id = snapshot.owner_id;
    let entry_names = unique_entry_names(&snapshot.file_refs);
    let archive_path = scratch_dir.join(archive_file_name(archive_name));

    let mut assembler = ZipAssembler::create(&archive_path).await?;
    let mut reporter = ProgressReporter::new(
        transport.clone(),
        owner_id,
        snapshot.file_refs.len(),
        snapshot.total_declared_size,
    );
    reporter.started().await;

    set_status(owner_id, ZipTaskStatus::Downloading);
    let FetchPool {
        mut results,
        driver,
    } = fetch::spawn_pool(
        transport.clone(),
        snapshot.file_refs.clone(),
        scratch_dir.to_path_buf(),
        config.concurrency(),
        cancelled.clone(),
    );

    let mut appended = 0usize;
    let outcome: Result<(), Error> = loop {
        if cancelled.load(Ordering::SeqCst) {
            break Err(Error::Cancelled);
        }
        match results.recv().await {
            Some(Ok(fetched)) => {
                reporter.file_downloaded(fetched.actual_size).await;
                // Downloads keep running while this entry is written; the
                // channel is the only path into the assembler.
                let entry_name = entry_names
                    .get(&fetched.file_ref.remote_id)
                    .cloned()
                    .unwrap_or_else(|| fetched.file_ref.declared_name.clone());
                if let Err(e) = assembler.append(&fetched.local_path, &entry_name).await {
                    break Err(e);
                }
                // Ownership passed to the archive; the download is no longer
                // needed on disk.
                let _ = tokio::fs::remove_file(&fetched.local_path).await;
                appended += 1;
                reporter.file_appended().await;
            }
            Some(Err(e)) => break Err(e),
            None => {
                // The pool can drain because workers bailed on a late cancel;
                // a drained channel alone does not mean success.
                if cancelled.load(Ordering::SeqCst) {
                    break Err(Error::Cancelled);
                }
                break Ok(());
            }
        }
    };

    let result = match outcome {
        Ok(()) => {
            let _ = driver.await;
            set_status(owner_id, ZipTaskStatus::Zipping);
            match assembler.finish().await {
                Ok(archive_size) => {
                    set_status(owner_id, ZipTaskStatus::Delivering);
                    let elapsed = started.elapsed();
                    finishing::deliver_archive(
                        transport.clone(),
                        owner_id,
                        &archive_path,
                        appended,
                        elapsed,
                    )
                    .await
                    .map(|()| ZipSummary {
                        entry_count: appended,
                        archive_size,
                        elapsed,
                    })
                }
                Err(e) => Err(e),
            }
        }
        Err(e) => {
            // Fail fast: stop admissions, let in-flight workers bail, and
            // reap every task before surfacing the error.
            cancelled.store(true, Ordering::SeqCst);
            drop(results);
            let _ = driver.await;
            assembler.abandon().await;
            Err(e)
        }
    };

    // The visible progress sequence always terminates, whatever the path.
    match result {
        Ok(summary) => {
            reporter.finished().await;
            Ok(summary)
        }
        Err(e) => {
            let message = match &e {
                Error::Cancelled => "Zip cancelled.".to_string(),
                e if e.is_retryable() => format!("An error occurred: {}. Please retry.", e),
                e => format!("An error occurred: {}", e),
            };
            reporter.failed(message).await;
            Err(e)
        }
    }
}

/// Archive names come from user text; keep the stem, append `.zip` if absent.
fn archive_file_name(archive_name: &str) -> String {
    if archive_name.to_ascii_lowercase().ends_with(".zip") {
        archive_name.to_string()
    } else {
        format!("{}.zip", archive_name)
    }
}

/// Deduplicate declared names so two files can never collide inside the
/// archive: later duplicates get a numeric suffix before the extension.
fn unique_entry_names(refs: &[FileRef]) -> HashMap<String, String> {
    let mut used: HashSet<String> = HashSet::with_capacity(refs.len());
    let mut names = HashMap::with_capacity(refs.len());

    for file_ref in refs {
        let base = if file_ref.declared_name.is_empty() {
            "file".to_string()
        } else {
            file_ref.declared_name.clone()
        };
        let mut candidate = base.clone();
        let mut counter = 1;
        while !used.insert(candidate.clone()) {
            candidate = suffixed(&base, counter);
            counter += 1;
        }
        names.insert(file_ref.remote_id.clone(), candidate);
    }
    names
}

fn suffixed(name: &str, counter: u32) -> String {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{}-{}.{}", stem, counter, ext),
        _ => format!("{}-{}", name, counter),
    }
}
