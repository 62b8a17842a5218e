//! Reacts to human approval decisions.
//!
//! A human approves or rejects by moving an `APPROVAL_*.md` file into
//! `Approved/` or `Rejected/`. The watcher handles files as filesystem
//! events report them and rescans both folders on an interval, which
//! catches anything the events missed. Every file it handles leaves the
//! folder. Approved files get exactly one dispatch attempt per process and
//! are moved to `Done/` whatever the outcome; the audit log records whether
//! the effect happened.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use backoffice_core::audit::{AuditEvent, AuditLogger};
use backoffice_core::frontmatter::{ApprovalRequest, Document};
use backoffice_core::types::ApprovalStatus;
use backoffice_core::vault::{move_into, Folder, Vault};
use notify::event::ModifyKind;
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{mpsc, Notify};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::lifecycle::{validate_transition, Stage};
use super::manager::{display_name, ApprovalManager, APPROVAL_PREFIX};
use crate::dispatcher::mark_source_replied;
use crate::error::ActionError;
use crate::handler::ActionDispatcher;
use crate::types::Decision;

const DISPATCH_ACTOR: &str = "orchestrator";
const HUMAN: &str = "human";

/// Watches `Approved/` and `Rejected/` for decisions.
pub struct ApprovalWatcher {
    vault: Vault,
    manager: Arc<ApprovalManager>,
    audit: Arc<AuditLogger>,
    dispatcher: Option<Arc<dyn ActionDispatcher>>,
    skip_actions: HashSet<String>,
    poll_interval: Duration,
    /// Approved files already dispatched whose move to `Done/` failed.
    dispatched: Mutex<HashSet<PathBuf>>,
    shutdown: Arc<Notify>,
}

impl ApprovalWatcher {
    pub fn new(vault: Vault, manager: Arc<ApprovalManager>, audit: Arc<AuditLogger>) -> Self {
        Self {
            vault,
            manager,
            audit,
            dispatcher: None,
            skip_actions: HashSet::new(),
            poll_interval: Duration::from_secs(5),
            dispatched: Mutex::new(HashSet::new()),
            shutdown: Arc::new(Notify::new()),
        }
    }

    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn ActionDispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Leave approved files with these actions to another dispatcher.
    pub fn skip_actions<I, S>(mut self, actions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.skip_actions.extend(actions.into_iter().map(Into::into));
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Handle one decided file. Returns its path in `Done/`, or `None`
    /// when the file is left in place.
    pub async fn handle_decision(
        &self,
        path: &Path,
        decision: Decision,
    ) -> Result<Option<PathBuf>, ActionError> {
        if !display_name(path).starts_with(APPROVAL_PREFIX) {
            return Ok(None);
        }
        info!(file = %display_name(path), decision = %decision, "Approval decision");
        match decision {
            Decision::Approved => self.handle_approved(path).await,
            Decision::Rejected => self.handle_rejected(path),
        }
    }

    async fn handle_approved(&self, path: &Path) -> Result<Option<PathBuf>, ActionError> {
        let request = self.manager.process_approved(path)?;
        if self.skip_actions.contains(&request.action) {
            debug!(file = %display_name(path), action = %request.action, "Left for polling dispatcher");
            return Ok(None);
        }
        validate_transition(Stage::Approved, Stage::Done)?;

        if self.was_dispatched(path) {
            debug!(file = %display_name(path), "Already dispatched, retrying move to Done");
        } else {
            self.dispatch(path, &request).await;
            self.dispatched_set().insert(path.to_path_buf());
        }

        let mut doc = Document::read(path)?;
        doc.front_matter
            .set("status", ApprovalStatus::Approved.to_string());
        doc.write(path)?;
        let dest = move_into(path, &self.vault.path(Stage::Done.folder()))?;
        self.dispatched_set().remove(path);
        Ok(Some(dest))
    }

    /// Record the approval and run the action once. Failures are audited.
    async fn dispatch(&self, path: &Path, request: &ApprovalRequest) {
        self.audit.record(
            AuditEvent::new("approval", HUMAN, display_name(path))
                .param("action", request.action.clone())
                .approval(ApprovalStatus::Approved)
                .approved_by(HUMAN),
        );

        let Some(dispatcher) = &self.dispatcher else {
            return;
        };
        let event = AuditEvent::new(&request.action, DISPATCH_ACTOR, request.target())
            .parameters(request.fields.to_json())
            .approval(ApprovalStatus::Approved)
            .approved_by(HUMAN)
            .source_file(display_name(path));
        match dispatcher.dispatch(request).await {
            Ok(result) => {
                info!(action = %request.action, target = %request.target(), "Action dispatched");
                let event = match result.message_id {
                    Some(id) => event.param("message_id", id),
                    None => event,
                };
                self.audit.record(event);
                if let Some(source) = &request.source {
                    mark_source_replied(&self.vault, source);
                }
            }
            Err(e) => {
                error!(file = %display_name(path), action = %request.action, error = %e, "Action dispatch failed");
                self.audit.record(event.failure(&e));
            }
        }
    }

    fn dispatched_set(&self) -> std::sync::MutexGuard<'_, HashSet<PathBuf>> {
        self.dispatched.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn was_dispatched(&self, path: &Path) -> bool {
        self.dispatched_set().contains(path)
    }

    fn handle_rejected(&self, path: &Path) -> Result<Option<PathBuf>, ActionError> {
        let request = ApprovalRequest::read(path)?;
        if request.status == ApprovalStatus::Expired {
            // Expired requests wait in Rejected/ for a human to review.
            return Ok(None);
        }
        self.manager.process_rejected(path).map(Some)
    }

    /// Handle every decided file currently in `Approved/` and `Rejected/`,
    /// in filename order. Returns the files moved to `Done/`.
    pub async fn scan(&self) -> Vec<PathBuf> {
        let mut done = Vec::new();
        for (folder, decision) in [
            (Folder::Approved, Decision::Approved),
            (Folder::Rejected, Decision::Rejected),
        ] {
            let files = match self.vault.list_markdown(folder, APPROVAL_PREFIX) {
                Ok(files) => files,
                Err(e) => {
                    warn!(folder = %folder, error = %e, "Failed to list approval folder");
                    continue;
                }
            };
            for path in files {
                match self.handle_decision(&path, decision).await {
                    Ok(Some(dest)) => done.push(dest),
                    Ok(None) => {}
                    Err(e) => {
                        warn!(file = %display_name(&path), error = %e, "Failed to handle approval decision")
                    }
                }
            }
        }
        done
    }

    /// Handle a path reported by a filesystem event. Paths outside
    /// `Approved/` and `Rejected/`, or already moved on, are ignored.
    pub async fn handle_event(&self, path: &Path) -> Option<PathBuf> {
        let decision = path
            .parent()
            .and_then(|dir| dir.file_name())
            .and_then(|name| name.to_str())
            .and_then(Decision::from_folder_name)?;
        if !path.is_file() {
            return None;
        }
        match self.handle_decision(path, decision).await {
            Ok(done) => done,
            Err(e) => {
                warn!(file = %display_name(path), error = %e, "Failed to handle approval decision");
                None
            }
        }
    }

    /// Start filesystem notifications for both decision folders. Paths of
    /// created or renamed-in files are sent on `tx`.
    fn watch_events(&self, tx: mpsc::UnboundedSender<PathBuf>) -> notify::Result<RecommendedWatcher> {
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            match res {
                Ok(event) => {
                    if matches!(
                        event.kind,
                        EventKind::Create(_) | EventKind::Modify(ModifyKind::Name(_))
                    ) {
                        for path in event.paths {
                            let _ = tx.send(path);
                        }
                    }
                }
                Err(e) => warn!(error = %e, "Approval folder watch error"),
            }
        })?;
        for folder in [Folder::Approved, Folder::Rejected] {
            watcher.watch(&self.vault.path(folder), RecursiveMode::NonRecursive)?;
        }
        Ok(watcher)
    }

    /// Handle events and rescan on the poll interval until
    /// [`shutdown`](Self::shutdown) is called. Without filesystem events
    /// the interval scan alone drives the watcher.
    pub async fn run(&self) {
        let (tx, mut events) = mpsc::unbounded_channel();
        let watch = match self.watch_events(tx) {
            Ok(watch) => Some(watch),
            Err(e) => {
                warn!(error = %e, "File events unavailable, polling only");
                None
            }
        };
        info!(
            interval_secs = self.poll_interval.as_secs(),
            events = watch.is_some(),
            "Approval watcher started"
        );

        let mut ticker = tokio::time::interval(self.poll_interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let done = self.scan().await;
                    if !done.is_empty() {
                        info!(count = done.len(), "Approval decisions processed");
                    }
                }
                Some(path) = events.recv() => {
                    if let Some(dest) = self.handle_event(&path).await {
                        debug!(file = %display_name(&dest), "Decision handled from file event");
                    }
                }
                _ = self.shutdown.notified() => break,
            }
        }
        info!("Approval watcher stopped");
    }

    /// Signal [`run`](Self::run) to return.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }
}
