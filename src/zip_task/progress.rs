//! Rate-limited progress reporting
//!
//! Every download completion and every append feeds the reporter; outward
//! updates are coalesced to at most one per interval and per percent step,
//! whichever is coarser. Terminal updates always flush.

use log::{debug, warn};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::types::ProgressSnapshot;
use crate::transport::Transport;

/// Minimum wall-clock gap between outward updates.
const UPDATE_INTERVAL: Duration = Duration::from_secs(2);

/// Minimum percent advance between outward updates.
const PERCENT_STEP: u32 = 10;

pub(crate) struct ProgressReporter<T> {
    transport: Arc<T>,
    owner_id: i64,
    total_count: usize,
    total_bytes: u64,
    completed_count: usize,
    completed_bytes: u64,
    last_sent: Option<Instant>,
    last_percent: u32,
}

impl<T: Transport> ProgressReporter<T> {
    pub(crate) fn new(
        transport: Arc<T>,
        owner_id: i64,
        total_count: usize,
        total_bytes: u64,
    ) -> Self {
        ProgressReporter {
            transport,
            owner_id,
            total_count,
            total_bytes,
            completed_count: 0,
            completed_bytes: 0,
            last_sent: None,
            last_percent: 0,
        }
    }

    fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            completed_count: self.completed_count,
            total_count: self.total_count,
            completed_bytes: self.completed_bytes,
            total_bytes: self.total_bytes,
        }
    }

    /// Announce the start of the build. Always sent.
    pub(crate) async fn started(&mut self) {
        self.send("Starting to download and zip your files...".to_string())
            .await;
    }

    /// A download finished; bytes are counted on completion.
    pub(crate) async fn file_downloaded(&mut self, actual_size: u64) {
        self.completed_bytes += actual_size;
        self.maybe_send().await;
    }

    /// An entry landed in the archive.
    pub(crate) async fn file_appended(&mut self) {
        self.completed_count += 1;
        self.maybe_send().await;
    }

    /// Terminal flush on success: the visible sequence always ends at 100%.
    pub(crate) async fn finished(&mut self) {
        let total = self.total_count;
        self.send(format!("Zipped {}/{} files (100%)", total, total))
            .await;
    }

    /// Terminal flush on failure or cancellation with the orchestrator's
    /// user-visible message.
    pub(crate) async fn failed(&mut self, message: String) {
        self.send(message).await;
    }

    async fn maybe_send(&mut self) {
        let snapshot = self.snapshot();
        let percent = snapshot.percent();
        let interval_elapsed = self
            .last_sent
            .map(|at| at.elapsed() >= UPDATE_INTERVAL)
            .unwrap_or(true);
        if !interval_elapsed || percent < self.last_percent.saturating_add(PERCENT_STEP) {
            debug!(
                "progress_coalesced: {} completed={}/{} percent={}",
                self.owner_id, snapshot.completed_count, snapshot.total_count, percent
            );
            return;
        }
        self.send(format!(
            "Zipping: {}/{} files ({}%)",
            snapshot.completed_count, snapshot.total_count, percent
        ))
        .await;
    }

    async fn send(&mut self, text: String) {
        let percent = self.snapshot().percent();
        self.last_sent = Some(Instant::now());
        self.last_percent = percent;
        // A lost progress edit must never abort a healthy build.
        if let Err(e) = self
            .transport
            .send_or_edit_text(self.owner_id, &text)
            .await
        {
            warn!("progress_send_failed: {} error={}", self.owner_id, e);
        }
    }
}
