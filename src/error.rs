//! Crate error type covering user, validation, transfer, and storage failures

use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// No open session exists for this owner.
    #[error("no open session for owner {0}, open one first")]
    NotOpen(i64),

    /// The owner already has a session in progress.
    #[error("a session is already open for owner {0}")]
    DuplicateOpen(i64),

    /// Finalize was requested before any file was added.
    #[error("session for owner {0} contains no files")]
    EmptySession(i64),

    /// Finalize was requested without an archive name.
    #[error("an archive name must be provided")]
    MissingName,

    /// The declared total exceeds the configured cap; nothing was fetched.
    #[error("total declared size {declared} exceeds the {cap} byte cap")]
    SizeExceeded { declared: u64, cap: u64 },

    /// A transfer produced a different byte count than the file declared.
    #[error("size mismatch for {name}: declared {declared}, transferred {actual}")]
    SizeMismatch {
        name: String,
        declared: u64,
        actual: u64,
    },

    /// The messaging/delivery collaborator failed mid-transfer.
    #[error("transfer failed: {0}")]
    Transport(String),

    /// The run was cancelled by the owner.
    #[error("zip task cancelled")]
    Cancelled,

    /// Local disk read/write failure.
    #[error("storage error: {0}")]
    Io(#[from] std::io::Error),

    /// Archive write failure.
    #[error("archive write failed: {0}")]
    Archive(#[from] zip::result::ZipError),

    /// Broken internal invariant; the session is force-closed.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// User errors are reported back directly and leave no state to clean up.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Error::NotOpen(_)
                | Error::DuplicateOpen(_)
                | Error::EmptySession(_)
                | Error::MissingName
        )
    }

    /// Transfer failures are worth retrying; storage and internal ones are not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Transport(_) | Error::SizeMismatch { .. })
    }
}
