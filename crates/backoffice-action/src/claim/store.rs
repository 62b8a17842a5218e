//! Ownership backends for claim-by-move.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use backoffice_core::error::{Result, VaultError};
use backoffice_core::vault::{unique_destination, validate_segment, Folder, Vault};

/// A claimed file and the agent holding it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claim {
    pub agent: String,
    pub file: String,
}

/// Storage primitive behind [`ClaimManager`](super::ClaimManager).
///
/// `Ok(None)` reports contention (lost race, already claimed, nothing to
/// release). `Err` is reserved for genuine faults such as permissions.
pub trait ClaimStore: Send + Sync {
    /// Take ownership of `item` for `owner`. Returns the new location.
    fn try_claim(&self, item: &Path, owner: &str) -> Result<Option<PathBuf>>;

    /// Move `owner`'s claimed `item_name` into `destination`.
    fn release(&self, item_name: &str, owner: &str, destination: Folder)
        -> Result<Option<PathBuf>>;

    /// Claims held by `owner`, or by every agent when `None`.
    fn list_claims(&self, owner: Option<&str>) -> Result<Vec<Claim>>;
}

/// Claims by atomic rename into `In_Progress/<agent>/`.
pub struct FsClaimStore {
    vault: Vault,
}

impl FsClaimStore {
    pub fn new(vault: Vault) -> Self {
        Self { vault }
    }
}

fn file_name(path: &Path) -> Result<String> {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| VaultError::InvalidPath(path.display().to_string()))
}

impl ClaimStore for FsClaimStore {
    fn try_claim(&self, item: &Path, owner: &str) -> Result<Option<PathBuf>> {
        let dir = self.vault.in_progress(owner)?;
        let name = file_name(item)?;
        validate_segment(&name)?;
        fs::create_dir_all(&dir)?;

        let dest = dir.join(&name);
        if dest.exists() {
            return Ok(None);
        }
        match fs::rename(item, &dest) {
            Ok(()) => Ok(Some(dest)),
            // Another agent moved the source first.
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn release(
        &self,
        item_name: &str,
        owner: &str,
        destination: Folder,
    ) -> Result<Option<PathBuf>> {
        validate_segment(item_name)?;
        let src = self.vault.in_progress(owner)?.join(item_name);
        if !src.exists() {
            return Ok(None);
        }
        let dir = self.vault.ensure(destination)?;
        // Never overwrite a same-named file already in the destination.
        let dest = unique_destination(&dir, item_name);
        match fs::rename(&src, &dest) {
            Ok(()) => Ok(Some(dest)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn list_claims(&self, owner: Option<&str>) -> Result<Vec<Claim>> {
        let root = self.vault.path(Folder::InProgress);
        let agents = match owner {
            Some(agent) => vec![agent.to_string()],
            None => {
                let entries = match fs::read_dir(&root) {
                    Ok(entries) => entries,
                    Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
                    Err(e) => return Err(e.into()),
                };
                let mut agents = Vec::new();
                for entry in entries {
                    let entry = entry?;
                    if entry.file_type()?.is_dir() {
                        agents.push(entry.file_name().to_string_lossy().into_owned());
                    }
                }
                agents.sort();
                agents
            }
        };

        let mut claims = Vec::new();
        for agent in agents {
            let dir = self.vault.in_progress(&agent)?;
            let entries = match fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            let mut files = Vec::new();
            for entry in entries {
                let entry = entry?;
                if entry.file_type()?.is_file() {
                    files.push(entry.file_name().to_string_lossy().into_owned());
                }
            }
            files.sort();
            claims.extend(files.into_iter().map(|file| Claim {
                agent: agent.clone(),
                file,
            }));
        }
        Ok(claims)
    }
}
