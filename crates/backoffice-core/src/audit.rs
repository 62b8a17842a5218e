//! Append-only audit log.
//!
//! One JSON array per UTC day at `Logs/YYYY-MM-DD.json`. Each append reads
//! the day's array, pushes the entry and replaces the file through a temp
//! file and rename, so the file is a valid JSON array at every instant.
//! Appends within a process are serialized by a mutex; separate processes
//! are expected to log to distinct vaults or tolerate last-writer-wins.

use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::clock::Clock;
use crate::error::Result;
use crate::types::{ApprovalStatus, AuditResult};
use crate::vault::{write_atomic, Folder, Vault};

/// Error text stored in an entry is cut to this many characters.
pub const MAX_ERROR_CHARS: usize = 200;

/// Default retention for day files.
pub const DEFAULT_RETENTION_DAYS: u32 = 90;

/// One recorded event, as stored on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub action_type: String,
    pub actor: String,
    pub target: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    pub approval_status: ApprovalStatus,
    #[serde(default)]
    pub approved_by: Option<String>,
    pub result: AuditResult,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub source_file: Option<String>,
}

/// Builder for an entry; the logger stamps the timestamp.
#[derive(Debug, Clone)]
pub struct AuditEvent {
    action_type: String,
    actor: String,
    target: String,
    parameters: Map<String, Value>,
    approval_status: ApprovalStatus,
    approved_by: Option<String>,
    result: AuditResult,
    error: Option<String>,
    source_file: Option<String>,
}

impl AuditEvent {
    pub fn new(
        action_type: impl Into<String>,
        actor: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            action_type: action_type.into(),
            actor: actor.into(),
            target: target.into(),
            parameters: Map::new(),
            approval_status: ApprovalStatus::NotRequired,
            approved_by: None,
            result: AuditResult::Success,
            error: None,
            source_file: None,
        }
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn parameters(mut self, parameters: Map<String, Value>) -> Self {
        self.parameters.extend(parameters);
        self
    }

    pub fn approval(mut self, status: ApprovalStatus) -> Self {
        self.approval_status = status;
        self
    }

    pub fn approved_by(mut self, who: impl Into<String>) -> Self {
        self.approved_by = Some(who.into());
        self
    }

    /// Mark the event failed with `error`, truncated to [`MAX_ERROR_CHARS`].
    pub fn failure(mut self, error: impl std::fmt::Display) -> Self {
        self.result = AuditResult::Failure;
        self.error = Some(truncate_chars(&error.to_string(), MAX_ERROR_CHARS));
        self
    }

    pub fn source_file(mut self, file: impl Into<String>) -> Self {
        self.source_file = Some(file.into());
        self
    }

    fn stamp(self, timestamp: DateTime<Utc>) -> AuditEntry {
        AuditEntry {
            timestamp,
            action_type: self.action_type,
            actor: self.actor,
            target: self.target,
            parameters: self.parameters,
            approval_status: self.approval_status,
            approved_by: self.approved_by,
            result: self.result,
            error: self.error,
            source_file: self.source_file,
        }
    }
}

/// Writes audit entries into the vault's `Logs/` folder.
pub struct AuditLogger {
    logs_dir: PathBuf,
    clock: Arc<dyn Clock>,
    write_lock: Mutex<()>,
}

impl AuditLogger {
    pub fn new(vault: &Vault, clock: Arc<dyn Clock>) -> Self {
        Self {
            logs_dir: vault.path(Folder::Logs),
            clock,
            write_lock: Mutex::new(()),
        }
    }

    /// Path of the day file for `date`.
    pub fn day_file(&self, date: NaiveDate) -> PathBuf {
        self.logs_dir.join(format!("{}.json", date.format("%Y-%m-%d")))
    }

    /// Append one entry to today's file and return it.
    pub fn log(&self, event: AuditEvent) -> Result<AuditEntry> {
        let entry = event.stamp(self.clock.now());
        let path = self.day_file(entry.timestamp.date_naive());

        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        fs::create_dir_all(&self.logs_dir)?;

        // Keep whatever is already there, even entries this version cannot
        // type; a corrupt file starts a fresh array.
        let mut entries: Vec<Value> = match fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text).unwrap_or_else(|e| {
                warn!(file = %path.display(), error = %e, "Corrupt audit log, starting fresh array");
                Vec::new()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        entries.push(serde_json::to_value(&entry)?);
        write_atomic(&path, &serde_json::to_string_pretty(&entries)?)?;
        Ok(entry)
    }

    /// Like [`log`](Self::log) but only warns on failure. Used where the
    /// audited operation has already happened and must not be undone.
    pub fn record(&self, event: AuditEvent) {
        let action = event.action_type.clone();
        if let Err(e) = self.log(event) {
            warn!(action = %action, error = %e, "Failed to write audit entry");
        }
    }

    /// Entries logged on `date`. Unreadable or foreign entries are skipped.
    pub fn entries_on(&self, date: NaiveDate) -> Result<Vec<AuditEntry>> {
        let path = self.day_file(date);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let raw: Vec<Value> = serde_json::from_str(&text).unwrap_or_default();
        Ok(raw
            .into_iter()
            .filter_map(|v| serde_json::from_value(v).ok())
            .collect())
    }

    /// The newest `count` entries across all day files, newest first.
    pub fn recent(&self, count: usize) -> Result<Vec<AuditEntry>> {
        let mut dates = self.day_files()?;
        dates.sort_by(|a, b| b.0.cmp(&a.0));

        let mut all = Vec::new();
        for (date, _) in dates {
            // Reverse append order so equal timestamps stay newest first.
            let mut day = self.entries_on(date)?;
            day.reverse();
            all.extend(day);
            if all.len() >= count {
                break;
            }
        }
        all.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        all.truncate(count);
        Ok(all)
    }

    /// Delete day files older than `retention_days`, judged by filename
    /// date. Returns the number of files deleted.
    pub fn cleanup(&self, retention_days: u32) -> Result<usize> {
        let today = self.clock.now().date_naive();
        let mut deleted = 0;
        for (date, path) in self.day_files()? {
            if (today - date).num_days() > i64::from(retention_days) {
                fs::remove_file(&path)?;
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    fn day_files(&self) -> Result<Vec<(NaiveDate, PathBuf)>> {
        let entries = match fs::read_dir(&self.logs_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut files = Vec::new();
        for entry in entries {
            let path = entry?.path();
            let Some(stem) = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| n.strip_suffix(".json"))
            else {
                continue;
            };
            if let Ok(date) = NaiveDate::parse_from_str(stem, "%Y-%m-%d") {
                files.push((date, path));
            }
        }
        Ok(files)
    }
}

/// Cut `s` to at most `max` characters on a char boundary.
pub fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}
