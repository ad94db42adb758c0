//! Owner-keyed registry of in-progress file collections

use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::Error;

/// Description of a remote file that has not been fetched yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRef {
    /// Opaque id the transport resolves to a byte stream (e.g. a URL or a
    /// message id).
    pub remote_id: String,
    /// Size the remote side declared for the file, in bytes.
    pub declared_size: u64,
    /// File name the remote side declared; used for the archive entry.
    pub declared_name: String,
}

/// Lifecycle of one owner's collection. `Closed` is represented by removal
/// from the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionStatus {
    #[serde(rename = "open")]
    Open,
    #[serde(rename = "finalizing")]
    Finalizing,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Open => write!(f, "open"),
            SessionStatus::Finalizing => write!(f, "finalizing"),
        }
    }
}

/// Running totals returned from `add_file` so the dispatch layer can echo
/// them back to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SessionTotals {
    pub file_count: usize,
    pub total_declared_size: u64,
}

/// Immutable view of a session handed to the pipeline at finalize time.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub owner_id: i64,
    pub file_refs: Vec<FileRef>,
    pub total_declared_size: u64,
}

#[derive(Debug)]
struct SessionEntry {
    status: SessionStatus,
    file_refs: Vec<FileRef>,
    total_declared_size: u64,
}

/// Owner-keyed store of sessions. One mutex serializes registry mutation;
/// the lock is never held across an await point.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<i64, SessionEntry>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        SessionRegistry::default()
    }

    /// Create an empty open session for the owner.
    pub fn open(&self, owner_id: i64) -> Result<(), Error> {
        let mut sessions = self.sessions.lock().unwrap();
        if sessions.contains_key(&owner_id) {
            return Err(Error::DuplicateOpen(owner_id));
        }
        sessions.insert(
            owner_id,
            SessionEntry {
                status: SessionStatus::Open,
                file_refs: Vec::new(),
                total_declared_size: 0,
            },
        );
        info!("session_open: {}", owner_id);
        Ok(())
    }

    /// Append a file reference to the owner's open session. A `remote_id`
    /// that is already present is skipped, so no ref can be fetched twice
    /// within one run.
    pub fn add_file(&self, owner_id: i64, file_ref: FileRef) -> Result<SessionTotals, Error> {
        let mut sessions = self.sessions.lock().unwrap();
        let entry = sessions.get_mut(&owner_id).ok_or(Error::NotOpen(owner_id))?;
        if entry.status != SessionStatus::Open {
            return Err(Error::NotOpen(owner_id));
        }
        if entry
            .file_refs
            .iter()
            .any(|existing| existing.remote_id == file_ref.remote_id)
        {
            debug!(
                "session_add_duplicate: {} remote_id={}",
                owner_id, file_ref.remote_id
            );
        } else {
            debug!(
                "session_add: {} remote_id={} name={} size={}",
                owner_id, file_ref.remote_id, file_ref.declared_name, file_ref.declared_size
            );
            entry.total_declared_size += file_ref.declared_size;
            entry.file_refs.push(file_ref);
        }
        Ok(SessionTotals {
            file_count: entry.file_refs.len(),
            total_declared_size: entry.total_declared_size,
        })
    }

    /// Move the owner's session from Open to Finalizing and return an
    /// immutable snapshot for the build. Further adds are rejected until the
    /// session is closed.
    pub fn finalize(&self, owner_id: i64) -> Result<SessionSnapshot, Error> {
        let mut sessions = self.sessions.lock().unwrap();
        let entry = sessions.get_mut(&owner_id).ok_or(Error::NotOpen(owner_id))?;
        if entry.status != SessionStatus::Open {
            return Err(Error::NotOpen(owner_id));
        }
        if entry.file_refs.is_empty() {
            return Err(Error::EmptySession(owner_id));
        }
        entry.status = SessionStatus::Finalizing;
        info!(
            "session_finalize: {} files={} declared_bytes={}",
            owner_id,
            entry.file_refs.len(),
            entry.total_declared_size
        );
        Ok(SessionSnapshot {
            owner_id,
            file_refs: entry.file_refs.clone(),
            total_declared_size: entry.total_declared_size,
        })
    }

    /// Remove the owner's session. Idempotent; used by success and
    /// failure/cancel paths alike.
    pub fn close(&self, owner_id: i64) -> bool {
        let removed = self.sessions.lock().unwrap().remove(&owner_id).is_some();
        if removed {
            info!("session_close: {}", owner_id);
        }
        removed
    }

    /// Current status, or `None` once the session is closed.
    pub fn status(&self, owner_id: i64) -> Option<SessionStatus> {
        self.sessions
            .lock()
            .unwrap()
            .get(&owner_id)
            .map(|entry| entry.status)
    }
}
