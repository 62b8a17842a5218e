//! Draft-only cloud agent.
//!
//! Works `Needs_Action/` under the `cloud` claim namespace with the
//! reasoner in draft mode. It never dispatches; anything it proposes goes
//! through `Pending_Approval/` for the local agent to execute. It also runs
//! the expiry sweep and writes a periodic status file into `Updates/`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use backoffice_core::audit::{AuditEvent, AuditLogger};
use backoffice_core::clock::Clock;
use backoffice_core::config::BackofficeConfig;
use backoffice_core::frontmatter::{Document, FrontMatter};
use backoffice_core::vault::{unique_destination, Folder, Vault};
use chrono::SecondsFormat;
use tokio::sync::Notify;
use tracing::{info, warn};

use crate::approval::ApprovalManager;
use crate::claim::ClaimManager;
use crate::error::ActionError;
use crate::reasoner::{Reasoner, ReasoningMode};
use crate::scheduler::{Schedule, Scheduler};
use crate::worker::TaskWorker;

/// Claim namespace of the cloud agent.
pub const CLOUD_AGENT: &str = "cloud";

/// Cloud-side agent process.
pub struct CloudAgent {
    config: BackofficeConfig,
    vault: Vault,
    clock: Arc<dyn Clock>,
    audit: Arc<AuditLogger>,
    approvals: Arc<ApprovalManager>,
    claims: Arc<ClaimManager>,
    worker: TaskWorker,
    shutdown: Arc<Notify>,
}

impl CloudAgent {
    pub fn new(config: BackofficeConfig, clock: Arc<dyn Clock>, reasoner: Arc<dyn Reasoner>) -> Self {
        let vault = Vault::new(config.vault_root());
        let audit = Arc::new(AuditLogger::new(&vault, Arc::clone(&clock)));
        let approvals = Arc::new(ApprovalManager::from_config(
            vault.clone(),
            Arc::clone(&audit),
            &config.approval,
            Arc::clone(&clock),
        ));
        let claims = Arc::new(ClaimManager::for_vault(&vault, Arc::clone(&audit)));
        let worker = TaskWorker::new(
            vault.clone(),
            CLOUD_AGENT,
            Arc::clone(&claims),
            reasoner,
            Arc::clone(&audit),
            ReasoningMode::DraftOnly,
        );
        Self {
            config,
            vault,
            clock,
            audit,
            approvals,
            claims,
            worker,
            shutdown: Arc::new(Notify::new()),
        }
    }

    pub fn vault(&self) -> &Vault {
        &self.vault
    }

    pub fn audit(&self) -> &Arc<AuditLogger> {
        &self.audit
    }

    pub fn approvals(&self) -> &Arc<ApprovalManager> {
        &self.approvals
    }

    /// Draft for every task in `Needs_Action/`. Returns the completed names.
    pub async fn process_needs_action(&self) -> Vec<String> {
        self.worker.work_pending().await
    }

    /// Write `Updates/cloud_status_<YYYYMMDD>_<HHMM>.md` with the current
    /// claim and queue counts.
    pub fn write_status_update(&self) -> Result<PathBuf, ActionError> {
        let now = self.clock.now();
        let claims = self.claims.list_claims(Some(CLOUD_AGENT)).len();
        let needs_action = self.vault.count(Folder::NeedsAction);
        let pending_approval = self.vault.count(Folder::PendingApproval);

        let mut fm = FrontMatter::new();
        fm.set("type", "cloud_status");
        fm.set("agent", CLOUD_AGENT);
        fm.set("timestamp", now.to_rfc3339_opts(SecondsFormat::Secs, false));
        fm.set("active_claims", claims as u64);
        fm.set("needs_action", needs_action as u64);
        fm.set("pending_approval", pending_approval as u64);
        let body = format!(
            "\n## Cloud Agent Status\n\n\
             - Active claims: {}\n\
             - Needs_Action items: {}\n\
             - Pending approvals: {}\n",
            claims, needs_action, pending_approval
        );

        let dir = self.vault.ensure(Folder::Updates)?;
        let path = unique_destination(
            &dir,
            &format!("cloud_status_{}.md", now.format("%Y%m%d_%H%M")),
        );
        Document::new(fm, body).write(&path)?;
        info!(file = %path.display(), claims, needs_action, "Cloud status written");
        Ok(path)
    }

    fn build_scheduler(self: &Arc<Self>) -> Result<Scheduler, ActionError> {
        let scheduler = Scheduler::new(Arc::clone(&self.clock));

        let this = Arc::clone(self);
        scheduler.add(
            "needs_action",
            Schedule::every(Duration::from_secs(self.config.agent.needs_action_poll_secs)),
            move || {
                let this = Arc::clone(&this);
                async move {
                    this.process_needs_action().await;
                    Ok::<(), ActionError>(())
                }
            },
        )?;

        let this = Arc::clone(self);
        scheduler.add(
            "expiry_sweep",
            Schedule::every(Duration::from_secs(self.config.approval.expiry_sweep_secs)),
            move || {
                let this = Arc::clone(&this);
                async move { this.approvals.check_expired().map(|_| ()) }
            },
        )?;

        let this = Arc::clone(self);
        scheduler.add(
            "status_update",
            Schedule::every(Duration::from_secs(self.config.agent.status_update_secs)),
            move || {
                let this = Arc::clone(&this);
                async move { this.write_status_update().map(|_| ()) }
            },
        )?;

        Ok(scheduler)
    }

    /// Run until [`shutdown`](Self::shutdown) is called.
    pub async fn run(self: Arc<Self>) -> Result<(), ActionError> {
        self.vault.ensure_layout()?;
        let scheduler = Arc::new(self.build_scheduler()?);

        self.audit.record(
            AuditEvent::new("system", CLOUD_AGENT, "cloud_agent").param("event", "start"),
        );
        info!(vault = %self.vault.root().display(), "Cloud agent started (draft-only)");
        if let Err(e) = self.write_status_update() {
            warn!(error = %e, "Failed to write initial status");
        }

        let runner = Arc::clone(&scheduler);
        let handle = tokio::spawn(async move { runner.run().await });

        self.shutdown.notified().await;
        scheduler.shutdown();
        if let Err(e) = handle.await {
            warn!(error = %e, "Scheduler task ended abnormally");
        }

        self.audit.record(
            AuditEvent::new("system", CLOUD_AGENT, "cloud_agent").param("event", "stop"),
        );
        info!("Cloud agent stopped");
        Ok(())
    }

    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }
}
