//! quickzip - bounded-concurrency download-and-zip pipeline
//!
//! Collects references to remotely-hosted files per owner, downloads them
//! under a concurrency limit, streams the results into a single zip archive,
//! and delivers it with live progress updates. Cleanup of scratch storage and
//! session state is guaranteed on success, failure, and cancellation.
//!
//! The command-dispatch layer, configuration loading, and logging setup are
//! the embedder's concern; everything here is driven through [`ZipService`]
//! and a [`Transport`] implementation.

mod config;
mod error;
mod service;
mod session;
mod transport;
mod zip_task;

pub use config::ZipConfig;
pub use error::Error;
pub use service::ZipService;
pub use session::{FileRef, SessionRegistry, SessionSnapshot, SessionStatus, SessionTotals};
pub use transport::{ByteStream, HttpTransport, Transport};
pub use zip_task::types::{ProgressSnapshot, ZipSummary, ZipTaskStatus};
