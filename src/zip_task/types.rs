//! Zip task status and progress payload definitions

use serde::Serialize;
use std::time::Duration;

/// Coarse phase of one finalize run, in the order the pipeline visits them.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub enum ZipTaskStatus {
    #[serde(rename = "validating")]
    Validating,
    #[serde(rename = "downloading")]
    Downloading,
    #[serde(rename = "zipping")]
    Zipping,
    #[serde(rename = "delivering")]
    Delivering,
    #[serde(rename = "cleanup")]
    Cleanup,
    #[serde(rename = "done")]
    Done,
    #[serde(rename = "cancelled")]
    Cancelled,
    #[serde(rename = "error")]
    Error,
}

impl std::fmt::Display for ZipTaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ZipTaskStatus::Validating => write!(f, "validating"),
            ZipTaskStatus::Downloading => write!(f, "downloading"),
            ZipTaskStatus::Zipping => write!(f, "zipping"),
            ZipTaskStatus::Delivering => write!(f, "delivering"),
            ZipTaskStatus::Cleanup => write!(f, "cleanup"),
            ZipTaskStatus::Done => write!(f, "done"),
            ZipTaskStatus::Cancelled => write!(f, "cancelled"),
            ZipTaskStatus::Error => write!(f, "error"),
        }
    }
}

/// Point-in-time progress of a run, recomputed on each event.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub completed_count: usize,
    pub total_count: usize,
    pub completed_bytes: u64,
    pub total_bytes: u64,
}

impl ProgressSnapshot {
    pub fn percent(&self) -> u32 {
        if self.total_bytes == 0 {
            return 0;
        }
        std::cmp::min(
            ((self.completed_bytes as f64 / self.total_bytes as f64) * 100.0).round() as u32,
            100,
        )
    }
}

/// Terminal result of a successful finalize run.
#[derive(Debug, Clone)]
pub struct ZipSummary {
    /// Number of entries written to the archive.
    pub entry_count: usize,
    /// Final size of the archive file, in bytes.
    pub archive_size: u64,
    /// Wall-clock time from validation to delivery.
    pub elapsed: Duration,
}
