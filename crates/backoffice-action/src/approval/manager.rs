//! Approval request creation, expiry and terminal bookkeeping.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use backoffice_core::audit::{AuditEvent, AuditLogger};
use backoffice_core::clock::Clock;
use backoffice_core::config::ApprovalConfig;
use backoffice_core::error::VaultError;
use backoffice_core::frontmatter::{ApprovalRequest, Document, FrontMatter, REPLY_BODY_HEADING};
use backoffice_core::types::ApprovalStatus;
use backoffice_core::vault::{move_into, unique_destination, write_new, Vault};
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use regex::Regex;
use serde_yaml::Value;
use tracing::{debug, info, warn};

use super::lifecycle::{validate_transition, Stage};
use super::policy::ExpiryPolicy;
use crate::error::ActionError;

/// Filename prefix of every approval request.
pub const APPROVAL_PREFIX: &str = "APPROVAL_";

/// Note appended to the body of an expired request.
pub const EXPIRED_NOTE: &str = "> Auto-rejected: expired";

const ACTOR: &str = "approval_manager";
const MAX_TARGET_CHARS: usize = 30;
const RESERVED_KEYS: [&str; 10] = [
    "type", "action", "id", "amount", "recipient", "reason", "plan_ref", "created", "expires",
    "status",
];

fn non_word_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\W").expect("Invalid filename regex"))
}

/// Fields of a new approval request.
#[derive(Debug, Clone, Default)]
pub struct NewApproval {
    pub action: String,
    pub amount: Option<f64>,
    pub recipient: String,
    pub reason: String,
    pub plan_ref: String,
    /// Outgoing message text, written under `## Reply Body`.
    pub reply_body: Option<String>,
    /// Extra front-matter fields, in order (e.g. `to`, `source_whatsapp`).
    pub parameters: Vec<(String, String)>,
}

impl NewApproval {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            ..Default::default()
        }
    }

    pub fn amount(mut self, amount: f64) -> Self {
        self.amount = Some(amount);
        self
    }

    pub fn recipient(mut self, recipient: impl Into<String>) -> Self {
        self.recipient = recipient.into();
        self
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    pub fn plan_ref(mut self, plan_ref: impl Into<String>) -> Self {
        self.plan_ref = plan_ref.into();
        self
    }

    pub fn reply_body(mut self, body: impl Into<String>) -> Self {
        self.reply_body = Some(body.into());
        self
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.push((key.into(), value.into()));
        self
    }

    /// The request as a dispatcher sees it, for actions that skip the
    /// approval folder. Status is `not_required`.
    pub fn to_request(&self) -> ApprovalRequest {
        let mut fm = FrontMatter::new();
        fm.set("action", self.action.as_str());
        if let Some(amount) = self.amount {
            fm.set("amount", amount);
        }
        fm.set("recipient", self.recipient.as_str());
        fm.set("reason", self.reason.as_str());
        fm.set("plan_ref", self.plan_ref.as_str());
        for (key, value) in &self.parameters {
            if !RESERVED_KEYS.contains(&key.as_str()) {
                fm.set(key, value.as_str());
            }
        }
        fm.set("status", ApprovalStatus::NotRequired.to_string());
        let body = self
            .reply_body
            .as_ref()
            .map(|reply| format!("{}\n\n{}\n", REPLY_BODY_HEADING, reply.trim()))
            .unwrap_or_default();
        ApprovalRequest::from_document(&Document::new(fm, body))
    }
}

/// Owns the approval file lifecycle in `Pending_Approval/` and the
/// terminal move of rejected requests.
pub struct ApprovalManager {
    vault: Vault,
    audit: Arc<AuditLogger>,
    policy: ExpiryPolicy,
    clock: Arc<dyn Clock>,
}

impl ApprovalManager {
    pub fn new(
        vault: Vault,
        audit: Arc<AuditLogger>,
        policy: ExpiryPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            vault,
            audit,
            policy,
            clock,
        }
    }

    /// Manager whose policy is read once from the configured handbook.
    pub fn from_config(
        vault: Vault,
        audit: Arc<AuditLogger>,
        config: &ApprovalConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let policy = ExpiryPolicy::load(
            &vault.root().join(&config.handbook_file),
            Duration::hours(i64::from(config.default_ttl_hours)),
        );
        Self::new(vault, audit, policy, clock)
    }

    pub fn policy(&self) -> &ExpiryPolicy {
        &self.policy
    }

    /// Write a new request into `Pending_Approval/` and return its path.
    ///
    /// The file is named `APPROVAL_<action>_<recipient>_<date>.md`, with a
    /// numeric suffix when that name is taken.
    pub fn create_approval(&self, request: NewApproval) -> Result<PathBuf, ActionError> {
        let now = self.clock.now();
        let ttl = self.policy.ttl_for(&request.action);
        let expires = now.checked_add_signed(ttl).ok_or_else(|| {
            ActionError::InvalidPayload(format!(
                "expiry of {} hours is out of range",
                ttl.num_hours()
            ))
        })?;
        let dir = self.vault.ensure(Stage::Pending.folder())?;

        let target: String = non_word_re()
            .replace_all(&request.recipient, "_")
            .chars()
            .take(MAX_TARGET_CHARS)
            .collect();
        let base = format!(
            "{}{}_{}_{}",
            APPROVAL_PREFIX,
            request.action,
            target,
            now.format("%Y-%m-%d")
        );

        let mut counter = 0;
        let path = loop {
            let stem = if counter == 0 {
                base.clone()
            } else {
                format!("{}_{}", base, counter)
            };
            counter += 1;
            let path = dir.join(format!("{}.md", stem));
            if path.exists() {
                continue;
            }

            let text = self.render_request(&request, &stem, now, expires).render()?;
            match write_new(&path, &text) {
                Ok(()) => break path,
                Err(VaultError::Io(e)) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            }
        };

        info!(
            action = %request.action,
            file = %display_name(&path),
            expires = %expires,
            "Approval requested"
        );
        self.audit.record(
            AuditEvent::new("approval", ACTOR, display_name(&path))
                .param("event", "created")
                .param("action", request.action.clone())
                .param("recipient", request.recipient.clone())
                .param("amount", request.amount)
                .param("expires", expires.to_rfc3339_opts(SecondsFormat::Secs, false))
                .approval(ApprovalStatus::Pending),
        );
        Ok(path)
    }

    fn render_request(
        &self,
        request: &NewApproval,
        id: &str,
        now: DateTime<Utc>,
        expires: DateTime<Utc>,
    ) -> Document {
        let mut fm = FrontMatter::new();
        fm.set("type", "approval_request");
        fm.set("action", request.action.as_str());
        fm.set("id", id);
        fm.set(
            "amount",
            match request.amount {
                Some(amount) => Value::from(amount),
                None => Value::Null,
            },
        );
        fm.set("recipient", request.recipient.as_str());
        fm.set("reason", request.reason.as_str());
        fm.set("plan_ref", request.plan_ref.as_str());
        fm.set("created", now.to_rfc3339_opts(SecondsFormat::Secs, false));
        fm.set("expires", expires.to_rfc3339_opts(SecondsFormat::Secs, false));
        fm.set("status", ApprovalStatus::Pending.to_string());
        for (key, value) in &request.parameters {
            if RESERVED_KEYS.contains(&key.as_str()) {
                warn!(key = %key, "Ignoring parameter that shadows a reserved field");
                continue;
            }
            fm.set(key, value.as_str());
        }

        let mut body = format!(
            "\n## Action Details\n**Action**: {}\n**Recipient**: {}\n",
            request.action, request.recipient
        );
        if let Some(amount) = request.amount {
            body.push_str(&format!("**Amount**: ${:.2}\n", amount));
        }
        body.push_str(&format!("**Reason**: {}\n\n", request.reason));
        if let Some(reply) = &request.reply_body {
            body.push_str(&format!("{}\n\n{}\n\n", REPLY_BODY_HEADING, reply.trim()));
        }
        body.push_str(
            "## To Approve\nMove this file to /Approved/ folder.\n\n\
             ## To Reject\nMove this file to /Rejected/ folder.\n",
        );
        Document::new(fm, body)
    }

    /// Move every past-due request from `Pending_Approval/` to `Rejected/`.
    ///
    /// Requests without a parseable `expires` are left alone. A file that
    /// fails to process is logged and skipped. Returns the new paths.
    pub fn check_expired(&self) -> Result<Vec<PathBuf>, ActionError> {
        let now = self.clock.now();
        let mut expired = Vec::new();
        for path in self.vault.list_markdown(Stage::Pending.folder(), "")? {
            match self.expire_if_due(&path, now) {
                Ok(Some(dest)) => expired.push(dest),
                Ok(None) => {}
                Err(e) => warn!(file = %display_name(&path), error = %e, "Expiry check failed"),
            }
        }
        if !expired.is_empty() {
            info!(count = expired.len(), "Expired approval requests moved to Rejected");
        }
        Ok(expired)
    }

    /// Expire `path` if it is past due. Renaming the file out of
    /// `Pending_Approval/` is the claim: when another sweep moves it first,
    /// this one returns `None` and records nothing.
    fn expire_if_due(
        &self,
        path: &Path,
        now: DateTime<Utc>,
    ) -> Result<Option<PathBuf>, ActionError> {
        let request = match ApprovalRequest::read(path) {
            Ok(request) => request,
            Err(VaultError::Io(e)) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let Some(expires) = request.expires else {
            debug!(file = %display_name(path), "No parseable expiry, skipping");
            return Ok(None);
        };
        if now <= expires {
            return Ok(None);
        }
        let from = Stage::from_status(request.status).unwrap_or(Stage::Pending);
        validate_transition(from, Stage::Expired)?;

        // Stage under a hidden name so watchers never see the file in
        // `Rejected/` before its status says expired.
        let name = display_name(path);
        let dir = self.vault.ensure(Stage::Expired.folder())?;
        let staged = dir.join(format!(".{}.expiring", name));
        match fs::rename(path, &staged) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(file = %name, "Already expired by another sweep");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        }

        let mut doc = Document::read(&staged)?;
        doc.front_matter
            .set("status", ApprovalStatus::Expired.to_string());
        doc.body.push_str(&format!("\n\n{}\n", EXPIRED_NOTE));
        doc.write(&staged)?;
        let dest = unique_destination(&dir, &name);
        fs::rename(&staged, &dest)?;

        self.audit.record(
            AuditEvent::new("approval", ACTOR, display_name(&dest))
                .param("event", "expired")
                .param("action", request.action)
                .param("expires", expires.to_rfc3339_opts(SecondsFormat::Secs, false))
                .approval(ApprovalStatus::Expired),
        );
        Ok(Some(dest))
    }

    /// Parse an approved request so the caller can branch on its action.
    pub fn process_approved(&self, path: &Path) -> Result<ApprovalRequest, ActionError> {
        Ok(ApprovalRequest::read(path)?)
    }

    /// Move a rejected or expired request into `Done/`.
    ///
    /// The `status` field is rewritten to `rejected` unless it already says
    /// `expired`. Returns the new path.
    pub fn process_rejected(&self, path: &Path) -> Result<PathBuf, ActionError> {
        let mut doc = Document::read(path)?;
        let request = ApprovalRequest::from_document(&doc);
        let stage = match request.status {
            ApprovalStatus::Expired => Stage::Expired,
            _ => Stage::Rejected,
        };
        validate_transition(stage, Stage::Done)?;

        let status = match stage {
            Stage::Expired => ApprovalStatus::Expired,
            _ => ApprovalStatus::Rejected,
        };
        doc.front_matter.set("status", status.to_string());
        doc.write(path)?;
        let dest = move_into(path, &self.vault.path(Stage::Done.folder()))?;

        info!(file = %display_name(&dest), status = %status, "Approval closed");
        self.audit.record(
            AuditEvent::new("approval", ACTOR, display_name(&dest))
                .param("event", status.to_string())
                .param("action", request.action)
                .approval(status),
        );
        Ok(dest)
    }
}

pub(crate) fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
