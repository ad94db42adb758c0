//! Pipeline configuration values

use serde::Deserialize;
use std::path::PathBuf;

/// Default number of concurrent downloads per zip task.
const DEFAULT_CONCURRENCY: usize = 3;

/// Default aggregate size cap (2000 MiB, just under 2.0 GB).
const DEFAULT_SIZE_CAP: u64 = 2000 * 1024 * 1024;

/// Runtime configuration for the zip pipeline. The embedder is responsible
/// for loading these values; missing fields fall back to defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ZipConfig {
    /// Maximum concurrent downloads per finalize run. Clamped to at least 1.
    pub max_concurrency: usize,
    /// Maximum aggregate declared size accepted for one archive job.
    pub size_cap_bytes: u64,
    /// Root directory for per-owner scratch storage.
    pub storage_root: PathBuf,
}

impl Default for ZipConfig {
    fn default() -> Self {
        ZipConfig {
            max_concurrency: DEFAULT_CONCURRENCY,
            size_cap_bytes: DEFAULT_SIZE_CAP,
            storage_root: PathBuf::from("./files"),
        }
    }
}

impl ZipConfig {
    /// Scratch directory for one owner's active run.
    pub(crate) fn scratch_dir(&self, owner_id: i64) -> PathBuf {
        self.storage_root.join(owner_id.to_string())
    }

    pub(crate) fn concurrency(&self) -> usize {
        self.max_concurrency.max(1)
    }
}

/// Scratch file name for a remote file, derived deterministically from its
/// id so retries within a run land on the same path and distinct ids never
/// collide.
pub(crate) fn scratch_file_name(remote_id: &str) -> String {
    use sha2::{Digest, Sha256};

    let mut hasher = Sha256::new();
    hasher.update(remote_id.as_bytes());
    hex::encode(hasher.finalize())
}
