//! Polling dispatcher for one approval action.
//!
//! Scans `Approved/` on a fixed interval for requests whose `action` matches,
//! sends the reply body through a [`MessageClient`], and moves each sent
//! request to `Done/`. A failed send leaves the file where it is, so the
//! next cycle retries it. A send that succeeded is never repeated by the
//! same process, even when the move to `Done/` fails. Dispatchers for
//! different actions coexist because each ignores files that are not its
//! own.

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use backoffice_core::audit::{AuditEvent, AuditLogger};
use backoffice_core::frontmatter::{ApprovalRequest, Document};
use backoffice_core::types::{ApprovalStatus, TaskStatus};
use backoffice_core::vault::{move_into, validate_segment, Folder, Vault};
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::approval::manager::{display_name, APPROVAL_PREFIX};
use crate::approval::{validate_transition, Stage};
use crate::error::ActionError;
use crate::handler::MessageClient;
use crate::rate_limit::RateLimiter;

const PREVIEW_CHARS: usize = 80;

/// Sends approved requests of a single action type.
pub struct ApprovalDispatcher {
    vault: Vault,
    action: String,
    client: Arc<dyn MessageClient>,
    audit: Arc<AuditLogger>,
    limiter: Option<Arc<RateLimiter>>,
    actor: String,
    /// Sent files still waiting for their move to `Done/`.
    sent: Mutex<HashSet<String>>,
    shutdown: Arc<Notify>,
}

impl ApprovalDispatcher {
    pub fn new(
        vault: Vault,
        action: impl Into<String>,
        client: Arc<dyn MessageClient>,
        audit: Arc<AuditLogger>,
    ) -> Self {
        let action = action.into();
        let actor = format!("{}_dispatcher", action.split('_').next().unwrap_or(&action));
        Self {
            vault,
            action,
            client,
            audit,
            limiter: None,
            actor,
            sent: Mutex::new(HashSet::new()),
            shutdown: Arc::new(Notify::new()),
        }
    }

    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    /// Send every matching request in `Approved/`, in filename order.
    /// Returns the filenames that were sent and moved to `Done/`.
    pub async fn process_pending(&self) -> Vec<String> {
        let files = match self.vault.list_markdown(Folder::Approved, APPROVAL_PREFIX) {
            Ok(files) => files,
            Err(e) => {
                warn!(action = %self.action, error = %e, "Failed to list Approved folder");
                return Vec::new();
            }
        };

        let mut processed = Vec::new();
        for path in files {
            let name = display_name(&path);
            match self.process_file(&path).await {
                Ok(true) => processed.push(name),
                Ok(false) => {}
                Err(e) if self.sent_set().contains(&name) => {
                    error!(file = %name, error = %e, "Sent but not moved to Done, retrying the move next cycle");
                }
                Err(e) => {
                    error!(file = %name, action = %self.action, error = %e, "Dispatch failed");
                    self.audit.record(
                        AuditEvent::new(self.sent_event(), &self.actor, &name).failure(&e),
                    );
                }
            }
        }
        processed
    }

    async fn process_file(&self, path: &Path) -> Result<bool, ActionError> {
        let name = display_name(path);
        if self.sent_set().contains(&name) {
            self.close(path)?;
            self.sent_set().remove(&name);
            info!(file = %name, "Moved previously sent request to Done");
            return Ok(true);
        }

        let request = ApprovalRequest::read(path)?;
        if request.action != self.action {
            return Ok(false);
        }

        let to = request.target().to_string();
        if to.is_empty() {
            warn!(file = %name, "Approval has no recipient, skipping");
            return Ok(false);
        }
        let Some(body) = request.reply_body.clone() else {
            warn!(file = %name, "Approval has no reply body, skipping");
            return Ok(false);
        };
        if let Some(limiter) = &self.limiter {
            if !limiter.check_action(&self.action) {
                debug!(file = %name, action = %self.action, "Rate limited, leaving for next cycle");
                return Ok(false);
            }
        }
        validate_transition(Stage::Approved, Stage::Done)?;

        info!(file = %name, to = %to, "Dispatching approved message");
        let receipt = self.client.send(&to, &body).await?;
        self.sent_set().insert(name.clone());

        self.audit.record(
            AuditEvent::new(self.sent_event(), &self.actor, &to)
                .param("approval_file", name.clone())
                .param("message_id", receipt.message_id.clone())
                .param("preview", body.chars().take(PREVIEW_CHARS).collect::<String>())
                .approval(ApprovalStatus::Approved)
                .approved_by("human")
                .source_file(name.clone()),
        );
        info!(file = %name, to = %to, message_id = %receipt.message_id, "Message sent");
        if let Some(source) = &request.source {
            mark_source_replied(&self.vault, source);
        }

        self.close(path)?;
        self.sent_set().remove(&name);
        Ok(true)
    }

    /// Stamp `status: approved` and move the request into `Done/`.
    fn close(&self, path: &Path) -> Result<(), ActionError> {
        let mut doc = Document::read(path)?;
        doc.front_matter
            .set("status", ApprovalStatus::Approved.to_string());
        doc.write(path)?;
        move_into(path, &self.vault.path(Stage::Done.folder()))?;
        Ok(())
    }

    fn sent_set(&self) -> MutexGuard<'_, HashSet<String>> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn sent_event(&self) -> String {
        format!("{}_sent", self.action)
    }

    /// Poll until [`shutdown`](Self::shutdown) is called. A failing cycle
    /// is logged and the loop continues.
    pub async fn run_forever(&self, interval: Duration) {
        info!(action = %self.action, interval_secs = interval.as_secs(), "Dispatcher started");
        loop {
            let processed = self.process_pending().await;
            if !processed.is_empty() {
                info!(count = processed.len(), files = ?processed, "Processed approvals");
            }
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = self.shutdown.notified() => break,
            }
        }
        info!(action = %self.action, "Dispatcher stopped");
    }

    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }
}

/// Set `status: replied` on the originating task, if it is still in
/// `Needs_Action/` or `Done/`. Failures are logged, not returned.
pub fn mark_source_replied(vault: &Vault, source: &str) {
    if let Err(e) = validate_segment(source) {
        warn!(source = %source, error = %e, "Ignoring invalid source filename");
        return;
    }
    for folder in [Folder::NeedsAction, Folder::Done] {
        let path = vault.path(folder).join(source);
        if !path.exists() {
            continue;
        }
        let result = Document::read(&path).and_then(|mut doc| {
            doc.front_matter.set("status", TaskStatus::Replied.to_string());
            doc.write(&path)
        });
        match result {
            Ok(()) => debug!(source = %source, folder = %folder, "Source task marked replied"),
            Err(e) => warn!(source = %source, error = %e, "Could not update source status"),
        }
        return;
    }
}
