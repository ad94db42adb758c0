//! Public facade exposed to the command-dispatch collaborator

use log::info;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::config::ZipConfig;
use crate::error::Error;
use crate::session::{FileRef, SessionRegistry, SessionTotals};
use crate::transport::Transport;
use crate::zip_task::types::ZipSummary;
use crate::zip_task::worker;

/// One service instance per process: owns the session registry, the
/// per-owner cancel flags, and the transport used by every run.
pub struct ZipService<T: Transport> {
    config: ZipConfig,
    transport: Arc<T>,
    registry: SessionRegistry,
    // Flag present iff a finalize run is active for that owner (using
    // std::sync::Mutex; the lock is never held across an await point).
    cancel_flags: Mutex<HashMap<i64, Arc<AtomicBool>>>,
}

impl<T: Transport> ZipService<T> {
    pub fn new(config: ZipConfig, transport: T) -> Self {
        ZipService {
            config,
            transport: Arc::new(transport),
            registry: SessionRegistry::new(),
            cancel_flags: Mutex::new(HashMap::new()),
        }
    }

    /// Start collecting files for an owner.
    pub fn open(&self, owner_id: i64) -> Result<(), Error> {
        self.registry.open(owner_id)
    }

    /// Add one file reference to the owner's open collection.
    pub fn add_file(&self, owner_id: i64, file_ref: FileRef) -> Result<SessionTotals, Error> {
        self.registry.add_file(owner_id, file_ref)
    }

    /// Build, deliver, and clean up the owner's archive. Progress flows
    /// through the transport while the call runs; the return value is the
    /// terminal result.
    pub async fn finalize(&self, owner_id: i64, archive_name: &str) -> Result<ZipSummary, Error> {
        let archive_name = archive_name.trim();
        if archive_name.is_empty() {
            return Err(Error::MissingName);
        }

        // Register the flag before the session transition so a concurrent
        // cancel always finds a run to signal; reuse a pre-set flag to avoid
        // races.
        let cancelled = {
            let mut flags = self.cancel_flags.lock().unwrap();
            flags
                .entry(owner_id)
                .or_insert_with(|| Arc::new(AtomicBool::new(false)))
                .clone()
        };

        let snapshot = match self.registry.finalize(owner_id) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                self.cancel_flags.lock().unwrap().remove(&owner_id);
                return Err(e);
            }
        };

        let result = worker::run_zip_task(
            self.transport.clone(),
            &self.config,
            snapshot,
            archive_name,
            cancelled,
        )
        .await;

        self.cancel_flags.lock().unwrap().remove(&owner_id);
        match &result {
            // The over-cap session survives so the owner can inspect it;
            // recovery is an explicit cancel-and-restart.
            Err(Error::SizeExceeded { .. }) => {}
            _ => {
                self.registry.close(owner_id);
            }
        }
        result
    }

    /// Cancel the owner's collection or active run. Returns `true` if there
    /// was anything to cancel.
    pub fn cancel(&self, owner_id: i64) -> bool {
        let active = {
            let flags = self.cancel_flags.lock().unwrap();
            flags.get(&owner_id).cloned()
        };
        if let Some(flag) = active {
            // The running finalize owns cleanup and will close the session.
            flag.store(true, Ordering::SeqCst);
            info!("cancel_requested: {} active_run=true", owner_id);
            return true;
        }
        let closed = self.registry.close(owner_id);
        if closed {
            info!("cancel_requested: {} active_run=false", owner_id);
        }
        closed
    }

    /// Read-only view of the owner's session state, for the dispatch layer.
    pub fn session_status(&self, owner_id: i64) -> Option<crate::session::SessionStatus> {
        self.registry.status(owner_id)
    }
}
