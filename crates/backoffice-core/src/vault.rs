//! Vault directory layout.
//!
//! The vault is a plain directory tree shared by every agent process. The
//! folder a file sits in *is* its state, so folder names are part of the
//! on-disk contract and never change.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::debug;

use crate::error::{Result, VaultError};

/// Canonical vault folders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Folder {
    Inbox,
    NeedsAction,
    Plans,
    PendingApproval,
    Approved,
    Rejected,
    InProgress,
    Done,
    Accounting,
    AccountingPending,
    Invoices,
    Briefings,
    Logs,
    Updates,
}

impl Folder {
    /// Every canonical folder, parents before children.
    pub const ALL: [Folder; 14] = [
        Folder::Inbox,
        Folder::NeedsAction,
        Folder::Plans,
        Folder::PendingApproval,
        Folder::Approved,
        Folder::Rejected,
        Folder::InProgress,
        Folder::Done,
        Folder::Accounting,
        Folder::AccountingPending,
        Folder::Invoices,
        Folder::Briefings,
        Folder::Logs,
        Folder::Updates,
    ];

    /// Path of this folder relative to the vault root.
    pub fn rel_path(&self) -> &'static str {
        match self {
            Folder::Inbox => "Inbox",
            Folder::NeedsAction => "Needs_Action",
            Folder::Plans => "Plans",
            Folder::PendingApproval => "Pending_Approval",
            Folder::Approved => "Approved",
            Folder::Rejected => "Rejected",
            Folder::InProgress => "In_Progress",
            Folder::Done => "Done",
            Folder::Accounting => "Accounting",
            Folder::AccountingPending => "Accounting/pending",
            Folder::Invoices => "Invoices",
            Folder::Briefings => "Briefings",
            Folder::Logs => "Logs",
            Folder::Updates => "Updates",
        }
    }
}

impl std::fmt::Display for Folder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.rel_path())
    }
}

/// Handle on a vault root directory.
#[derive(Debug, Clone)]
pub struct Vault {
    root: PathBuf,
}

impl Vault {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, folder: Folder) -> PathBuf {
        self.root.join(folder.rel_path())
    }

    /// `In_Progress/<agent>/`. The agent name must be a single path segment.
    pub fn in_progress(&self, agent: &str) -> Result<PathBuf> {
        validate_segment(agent)?;
        Ok(self.path(Folder::InProgress).join(agent))
    }

    /// Create `folder` if missing and return its path.
    pub fn ensure(&self, folder: Folder) -> Result<PathBuf> {
        let path = self.path(folder);
        fs::create_dir_all(&path)?;
        Ok(path)
    }

    /// Create every canonical folder. Returns the folders that were missing.
    pub fn ensure_layout(&self) -> Result<Vec<Folder>> {
        let mut created = Vec::new();
        for folder in Folder::ALL {
            let path = self.path(folder);
            if !path.is_dir() {
                fs::create_dir_all(&path)?;
                created.push(folder);
            }
        }
        if !created.is_empty() {
            debug!(root = %self.root.display(), count = created.len(), "Vault folders created");
        }
        Ok(created)
    }

    /// Markdown files directly inside `folder` whose name starts with
    /// `prefix`, sorted by filename. A missing folder yields an empty list.
    pub fn list_markdown(&self, folder: Folder, prefix: &str) -> Result<Vec<PathBuf>> {
        list_markdown_in(&self.path(folder), prefix)
    }

    /// Number of markdown files in `folder`.
    pub fn count(&self, folder: Folder) -> usize {
        self.list_markdown(folder, "").map(|v| v.len()).unwrap_or(0)
    }
}

/// Markdown files directly inside `dir`, sorted by filename.
pub fn list_markdown_in(dir: &Path, prefix: &str) -> Result<Vec<PathBuf>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut files = Vec::new();
    for entry in entries {
        // Entries can vanish mid-listing when another agent moves them.
        let Ok(entry) = entry else { continue };
        let path = entry.path();
        if !entry.file_type().is_ok_and(|t| t.is_file()) {
            continue;
        }
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with(prefix) && name.ends_with(".md") {
            files.push(path);
        }
    }
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}

/// Reject names that would escape their parent directory.
pub fn validate_segment(name: &str) -> Result<()> {
    if name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\')
    {
        return Err(VaultError::InvalidPath(name.to_string()));
    }
    Ok(())
}

/// First free path for `file_name` inside `dir`, appending `_1`, `_2`, ...
/// before the extension on collision.
pub fn unique_destination(dir: &Path, file_name: &str) -> PathBuf {
    let candidate = dir.join(file_name);
    if !candidate.exists() {
        return candidate;
    }
    let (stem, ext) = match file_name.rsplit_once('.') {
        Some((stem, ext)) => (stem, format!(".{}", ext)),
        None => (file_name, String::new()),
    };
    let mut n = 1;
    loop {
        let candidate = dir.join(format!("{}_{}{}", stem, n, ext));
        if !candidate.exists() {
            return candidate;
        }
        n += 1;
    }
}

/// Move `src` into `dir`, keeping its name unless it collides.
pub fn move_into(src: &Path, dir: &Path) -> Result<PathBuf> {
    let name = src
        .file_name()
        .ok_or_else(|| VaultError::InvalidPath(src.display().to_string()))?
        .to_string_lossy()
        .into_owned();
    fs::create_dir_all(dir)?;
    let dest = unique_destination(dir, &name);
    fs::rename(src, &dest)?;
    Ok(dest)
}

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Hidden sibling of `path`, unique per process and call.
fn temp_sibling(path: &Path) -> Result<PathBuf> {
    let name = path
        .file_name()
        .ok_or_else(|| VaultError::InvalidPath(path.display().to_string()))?
        .to_string_lossy()
        .into_owned();
    let n = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    Ok(path.with_file_name(format!(".{}.{}.{}.tmp", name, std::process::id(), n)))
}

/// Replace `path` with `contents` through a sibling temp file and rename,
/// so readers never observe a half-written file.
pub fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let tmp = temp_sibling(path)?;
    if let Err(e) = fs::write(&tmp, contents).and_then(|()| fs::rename(&tmp, path)) {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }
    Ok(())
}

/// Create `path` with `contents`, failing with `AlreadyExists` when the
/// name is taken. The name only appears once the contents are complete,
/// and nothing is left behind on failure.
pub fn write_new(path: &Path, contents: &str) -> Result<()> {
    let tmp = temp_sibling(path)?;
    let result = fs::write(&tmp, contents).and_then(|()| fs::hard_link(&tmp, path));
    let _ = fs::remove_file(&tmp);
    result?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_ensure_layout_creates_all_folders() {
        let dir = TempDir::new().unwrap();
        let vault = Vault::new(dir.path());

        let created = vault.ensure_layout().unwrap();
        assert_eq!(created.len(), Folder::ALL.len());
        for folder in Folder::ALL {
            assert!(vault.path(folder).is_dir(), "{} missing", folder);
        }

        // Second call is a no-op.
        assert!(vault.ensure_layout().unwrap().is_empty());
    }

    #[test]
    fn test_in_progress_rejects_bad_agent_names() {
        let vault = Vault::new("/vault");
        assert!(vault.in_progress("local").is_ok());
        assert!(vault.in_progress("").is_err());
        assert!(vault.in_progress("..").is_err());
        assert!(vault.in_progress("a/b").is_err());
    }

    #[test]
    fn test_list_markdown_sorted_and_filtered() {
        let dir = TempDir::new().unwrap();
        let vault = Vault::new(dir.path());
        let approved = vault.ensure(Folder::Approved).unwrap();
        fs::write(approved.join("APPROVAL_b.md"), "").unwrap();
        fs::write(approved.join("APPROVAL_a.md"), "").unwrap();
        fs::write(approved.join("notes.md"), "").unwrap();
        fs::write(approved.join("APPROVAL_c.txt"), "").unwrap();
        fs::create_dir(approved.join("APPROVAL_dir.md")).unwrap();

        let files = vault.list_markdown(Folder::Approved, "APPROVAL_").unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["APPROVAL_a.md", "APPROVAL_b.md"]);
        assert_eq!(vault.count(Folder::Approved), 3);
    }

    #[test]
    fn test_list_markdown_missing_folder_is_empty() {
        let dir = TempDir::new().unwrap();
        let vault = Vault::new(dir.path().join("absent"));
        assert!(vault.list_markdown(Folder::Done, "").unwrap().is_empty());
    }

    #[test]
    fn test_unique_destination_appends_suffix() {
        let dir = TempDir::new().unwrap();
        assert_eq!(unique_destination(dir.path(), "x.md"), dir.path().join("x.md"));
        fs::write(dir.path().join("x.md"), "").unwrap();
        fs::write(dir.path().join("x_1.md"), "").unwrap();
        assert_eq!(
            unique_destination(dir.path(), "x.md"),
            dir.path().join("x_2.md")
        );
    }

    #[test]
    fn test_move_into_and_write_atomic() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("item.md");
        write_atomic(&src, "hello").unwrap();
        assert_eq!(fs::read_to_string(&src).unwrap(), "hello");

        let dest = move_into(&src, &dir.path().join("Done")).unwrap();
        assert!(!src.exists());
        assert_eq!(dest, dir.path().join("Done").join("item.md"));
        assert_eq!(fs::read_to_string(&dest).unwrap(), "hello");
    }

    #[test]
    fn test_write_new_never_clobbers() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("APPROVAL_x.md");
        write_new(&path, "first").unwrap();

        let err = write_new(&path, "second").unwrap_err();
        assert!(matches!(err, VaultError::Io(ref e) if e.kind() == std::io::ErrorKind::AlreadyExists));
        assert_eq!(fs::read_to_string(&path).unwrap(), "first");

        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(leftovers, vec!["APPROVAL_x.md"]);
    }

    #[test]
    fn test_write_new_failure_leaves_nothing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing").join("APPROVAL_x.md");
        assert!(write_new(&path, "body").is_err());
        assert!(!path.exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
