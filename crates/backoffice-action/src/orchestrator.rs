//! Local agent composition root.
//!
//! Owns the vault services for one long-lived process: works tasks from
//! `Needs_Action/`, routes requested actions through approval or straight
//! to dispatch, and runs the approval watcher, the polling dispatchers and
//! the scheduled sweeps until shut down.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use backoffice_core::audit::{AuditEvent, AuditLogger};
use backoffice_core::clock::Clock;
use backoffice_core::config::BackofficeConfig;
use backoffice_core::types::ApprovalStatus;
use backoffice_core::vault::Vault;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::approval::{ApprovalManager, ApprovalWatcher, NewApproval};
use crate::claim::ClaimManager;
use crate::dispatcher::ApprovalDispatcher;
use crate::error::ActionError;
use crate::handler::{ActionDispatcher, ActionRegistry, MessageClient};
use crate::rate_limit::RateLimiter;
use crate::reasoner::{Reasoner, ReasoningMode};
use crate::scheduler::{Schedule, Scheduler};
use crate::types::ActionResult;
use crate::worker::TaskWorker;

/// What [`Orchestrator::request_action`] did with a request.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionOutcome {
    /// Auto-approved and executed.
    Dispatched(ActionResult),
    /// Written to `Pending_Approval/` for a human.
    PendingApproval(PathBuf),
}

/// The local agent.
pub struct Orchestrator {
    config: BackofficeConfig,
    vault: Vault,
    audit: Arc<AuditLogger>,
    limiter: Arc<RateLimiter>,
    approvals: Arc<ApprovalManager>,
    claims: Arc<ClaimManager>,
    dispatcher: Arc<dyn ActionDispatcher>,
    worker: Arc<TaskWorker>,
    watcher: Arc<ApprovalWatcher>,
    polled: Vec<Arc<ApprovalDispatcher>>,
    clock: Arc<dyn Clock>,
    shutdown: Arc<Notify>,
}

impl Orchestrator {
    /// Wire the services for `config`. `registry` executes approved and
    /// auto-approved actions; it is gated by the configured rate limits.
    pub fn new(
        config: BackofficeConfig,
        clock: Arc<dyn Clock>,
        registry: ActionRegistry,
        reasoner: Arc<dyn Reasoner>,
    ) -> Self {
        let vault = Vault::new(config.vault_root());
        let audit = Arc::new(AuditLogger::new(&vault, Arc::clone(&clock)));
        let limiter = Arc::new(RateLimiter::from_config(&config.rate_limits));
        let dispatcher: Arc<dyn ActionDispatcher> =
            Arc::new(registry.with_rate_limiter(Arc::clone(&limiter)));
        let approvals = Arc::new(ApprovalManager::from_config(
            vault.clone(),
            Arc::clone(&audit),
            &config.approval,
            Arc::clone(&clock),
        ));
        let claims = Arc::new(ClaimManager::for_vault(&vault, Arc::clone(&audit)));
        let worker = Arc::new(TaskWorker::new(
            vault.clone(),
            config.agent.name.clone(),
            Arc::clone(&claims),
            reasoner,
            Arc::clone(&audit),
            ReasoningMode::Full,
        ));
        let watcher = Arc::new(
            ApprovalWatcher::new(vault.clone(), Arc::clone(&approvals), Arc::clone(&audit))
                .with_dispatcher(Arc::clone(&dispatcher))
                .skip_actions(config.dispatch.polled_actions.iter().cloned())
                .with_poll_interval(Duration::from_secs(config.dispatch.watcher_poll_secs)),
        );

        Self {
            config,
            vault,
            audit,
            limiter,
            approvals,
            claims,
            dispatcher,
            worker,
            watcher,
            polled: Vec::new(),
            clock,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Add a polling dispatcher that sends approved `action` requests
    /// through `client`. It shares the orchestrator's rate limiter.
    pub fn with_polled_client(mut self, action: &str, client: Arc<dyn MessageClient>) -> Self {
        if !self.config.dispatch.polled_actions.iter().any(|a| a == action) {
            warn!(action, "Polled dispatcher for an action the watcher also dispatches");
        }
        let dispatcher =
            ApprovalDispatcher::new(self.vault.clone(), action, client, Arc::clone(&self.audit))
                .with_rate_limiter(Arc::clone(&self.limiter));
        self.polled.push(Arc::new(dispatcher));
        self
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

    pub fn claims(&self) -> &Arc<ClaimManager> {
        &self.claims
    }

    pub fn watcher(&self) -> &Arc<ApprovalWatcher> {
        &self.watcher
    }

    pub fn polled_dispatchers(&self) -> &[Arc<ApprovalDispatcher>] {
        &self.polled
    }

    pub fn requires_approval(&self, action: &str) -> bool {
        !self.config.approval.auto_approve.iter().any(|a| a == action)
    }

    /// Route a proposed action: auto-approved actions are executed now,
    /// everything else becomes an approval request.
    pub async fn request_action(&self, request: NewApproval) -> Result<ActionOutcome, ActionError> {
        if self.requires_approval(&request.action) {
            let path = self.approvals.create_approval(request)?;
            return Ok(ActionOutcome::PendingApproval(path));
        }

        let request = request.to_request();
        let event = AuditEvent::new(&request.action, self.worker.agent(), request.target())
            .parameters(request.fields.to_json())
            .approval(ApprovalStatus::NotRequired);
        match self.dispatcher.dispatch(&request).await {
            Ok(result) => {
                info!(action = %request.action, target = %request.target(), "Auto-approved action dispatched");
                let event = match &result.message_id {
                    Some(id) => event.param("message_id", id.clone()),
                    None => event,
                };
                self.audit.record(event);
                Ok(ActionOutcome::Dispatched(result))
            }
            Err(e) => {
                error!(action = %request.action, error = %e, "Auto-approved action failed");
                self.audit.record(event.failure(&e));
                Err(e)
            }
        }
    }

    /// Work every task in `Needs_Action/`. Returns the completed names.
    pub async fn process_needs_action(&self) -> Vec<String> {
        self.worker.work_pending().await
    }

    /// Expire past-due approval requests. Errors are logged.
    pub fn sweep_expired(&self) -> Vec<PathBuf> {
        self.approvals.check_expired().unwrap_or_else(|e| {
            warn!(error = %e, "Expiry sweep failed");
            Vec::new()
        })
    }

    /// Delete audit day files past the retention window.
    pub fn cleanup_logs(&self) -> Result<usize, ActionError> {
        Ok(self.audit.cleanup(self.config.audit.retention_days)?)
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
            "log_cleanup",
            Schedule::cron(&self.config.audit.cleanup_cron)?,
            move || {
                let this = Arc::clone(&this);
                async move { this.cleanup_logs().map(|_| ()) }
            },
        )?;

        Ok(scheduler)
    }

    fn audit_system(&self, event: &str) {
        self.audit.record(
            AuditEvent::new("system", self.worker.agent(), "orchestrator").param("event", event),
        );
    }

    /// Run every component until [`shutdown`](Self::shutdown) is called.
    pub async fn run(self: Arc<Self>) -> Result<(), ActionError> {
        self.vault.ensure_layout()?;
        let scheduler = Arc::new(self.build_scheduler()?);

        self.audit_system("start");
        info!(
            agent = %self.worker.agent(),
            vault = %self.vault.root().display(),
            polled = self.polled.len(),
            "Orchestrator started"
        );

        let expired = self.sweep_expired();
        if !expired.is_empty() {
            info!(count = expired.len(), "Expired approvals at startup");
        }

        let mut handles: Vec<JoinHandle<()>> = Vec::new();
        let watcher = Arc::clone(&self.watcher);
        handles.push(tokio::spawn(async move { watcher.run().await }));

        let interval = Duration::from_secs(self.config.dispatch.poll_interval_secs);
        for dispatcher in &self.polled {
            let dispatcher = Arc::clone(dispatcher);
            handles.push(tokio::spawn(async move {
                dispatcher.run_forever(interval).await
            }));
        }

        let runner = Arc::clone(&scheduler);
        handles.push(tokio::spawn(async move { runner.run().await }));

        self.shutdown.notified().await;
        info!("Orchestrator shutting down");

        self.watcher.shutdown();
        for dispatcher in &self.polled {
            dispatcher.shutdown();
        }
        scheduler.shutdown();
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Component task ended abnormally");
            }
        }

        self.audit_system("stop");
        info!("Orchestrator stopped");
        Ok(())
    }

    /// Signal [`run`](Self::run) to stop its components and return.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }
}
