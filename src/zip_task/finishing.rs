//! Delivery hand-off and scratch cleanup

use log::{info, warn};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::error::Error;
use crate::transport::Transport;

/// Hand the finished archive to the delivery collaborator.
pub(crate) async fn deliver_archive<T: Transport>(
    transport: Arc<T>,
    owner_id: i64,
    archive_path: &Path,
    entry_count: usize,
    elapsed: Duration,
) -> Result<(), Error> {
    let caption = format!(
        "Done! Zipped {} files in {:.2} seconds.",
        entry_count,
        elapsed.as_secs_f64()
    );
    info!(
        "deliver_start: {} path={} entries={}",
        owner_id,
        archive_path.display(),
        entry_count
    );
    transport
        .deliver_document(owner_id, archive_path, &caption)
        .await?;
    info!("deliver_done: {}", owner_id);
    Ok(())
}

/// Remove the owner's scratch directory. Best effort: a cleanup failure is
/// logged, never surfaced over the run's own outcome.
pub(crate) async fn remove_scratch(owner_id: i64, scratch_dir: &Path) {
    match tokio::fs::remove_dir_all(scratch_dir).await {
        Ok(()) => info!("scratch_removed: {} path={}", owner_id, scratch_dir.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(
            "scratch_remove_failed: {} path={} error={}",
            owner_id,
            scratch_dir.display(),
            e
        ),
    }
}
