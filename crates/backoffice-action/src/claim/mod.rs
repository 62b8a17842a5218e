//! Claim-by-move task ownership.
//!
//! A task belongs to whichever agent last renamed it into
//! `In_Progress/<agent>/`. Losing a race is an ordinary outcome and is
//! reported as `false`, never as an error.

pub mod store;

use std::path::Path;
use std::sync::Arc;

use backoffice_core::audit::{AuditEvent, AuditLogger};
use backoffice_core::vault::{Folder, Vault};
use tracing::{debug, info, warn};

pub use store::{Claim, ClaimStore, FsClaimStore};

/// Audited front end over a [`ClaimStore`].
pub struct ClaimManager {
    store: Arc<dyn ClaimStore>,
    audit: Arc<AuditLogger>,
}

impl ClaimManager {
    pub fn new(store: Arc<dyn ClaimStore>, audit: Arc<AuditLogger>) -> Self {
        Self { store, audit }
    }

    /// Manager over the filesystem store for `vault`.
    pub fn for_vault(vault: &Vault, audit: Arc<AuditLogger>) -> Self {
        Self::new(Arc::new(FsClaimStore::new(vault.clone())), audit)
    }

    /// Move `item` into `In_Progress/<agent>/`.
    ///
    /// Returns `false` when the file is already gone, already claimed, or
    /// the move fails for any other reason (logged).
    pub fn claim(&self, item: &Path, agent: &str) -> bool {
        let name = item
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        match self.store.try_claim(item, agent) {
            Ok(Some(dest)) => {
                info!(agent, file = %name, "Task claimed");
                self.audit.record(
                    AuditEvent::new("claim", agent, &name)
                        .param("destination", dest.display().to_string()),
                );
                true
            }
            Ok(None) => {
                debug!(agent, file = %name, "Claim lost");
                false
            }
            Err(e) => {
                warn!(agent, file = %name, error = %e, "Claim failed");
                false
            }
        }
    }

    /// Move `In_Progress/<agent>/<item_name>` into `destination`.
    ///
    /// Returns `false` when the agent does not hold the file.
    pub fn release(&self, item_name: &str, agent: &str, destination: Folder) -> bool {
        match self.store.release(item_name, agent, destination) {
            Ok(Some(dest)) => {
                info!(agent, file = %item_name, destination = %destination, "Task released");
                self.audit.record(
                    AuditEvent::new("release", agent, item_name)
                        .param("destination", destination.rel_path())
                        .param("path", dest.display().to_string()),
                );
                true
            }
            Ok(None) => {
                debug!(agent, file = %item_name, "Nothing to release");
                false
            }
            Err(e) => {
                warn!(agent, file = %item_name, error = %e, "Release failed");
                false
            }
        }
    }

    /// Current claims, for one agent or all. Errors yield an empty list.
    pub fn list_claims(&self, agent: Option<&str>) -> Vec<Claim> {
        self.store.list_claims(agent).unwrap_or_else(|e| {
            warn!(error = %e, "Failed to list claims");
            Vec::new()
        })
    }
}
