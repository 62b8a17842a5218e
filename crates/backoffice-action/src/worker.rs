//! Claim -> reason -> release loop over `Needs_Action/`.

use std::path::Path;
use std::sync::Arc;

use backoffice_core::audit::{AuditEvent, AuditLogger};
use backoffice_core::vault::{Folder, Vault};
use tracing::{debug, error, info, warn};

use crate::approval::manager::display_name;
use crate::claim::ClaimManager;
use crate::error::ActionError;
use crate::reasoner::{Reasoner, ReasoningMode};

/// Outcome of one task attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Another agent got there first.
    Lost,
    /// Reasoning succeeded; the task is in `Done/`.
    Completed,
    /// Reasoning failed; the task is back in `Needs_Action/`.
    Returned,
}

/// Works tasks for one agent name.
pub struct TaskWorker {
    vault: Vault,
    agent: String,
    claims: Arc<ClaimManager>,
    reasoner: Arc<dyn Reasoner>,
    audit: Arc<AuditLogger>,
    mode: ReasoningMode,
}

impl TaskWorker {
    pub fn new(
        vault: Vault,
        agent: impl Into<String>,
        claims: Arc<ClaimManager>,
        reasoner: Arc<dyn Reasoner>,
        audit: Arc<AuditLogger>,
        mode: ReasoningMode,
    ) -> Self {
        Self {
            vault,
            agent: agent.into(),
            claims,
            reasoner,
            audit,
            mode,
        }
    }

    pub fn agent(&self) -> &str {
        &self.agent
    }

    /// Claim `task`, reason over it, and release it.
    pub async fn work(&self, task: &Path) -> Result<TaskOutcome, ActionError> {
        let name = display_name(task);
        if !self.claims.claim(task, &self.agent) {
            return Ok(TaskOutcome::Lost);
        }
        let claimed = self.vault.in_progress(&self.agent)?.join(&name);

        match self.reasoner.reason(&claimed, self.mode).await {
            Ok(_) => {
                info!(agent = %self.agent, file = %name, "Task completed");
                if !self.claims.release(&name, &self.agent, Folder::Done) {
                    warn!(agent = %self.agent, file = %name, "Completed task could not be released");
                }
                Ok(TaskOutcome::Completed)
            }
            Err(e) => {
                error!(agent = %self.agent, file = %name, error = %e, "Reasoning failed");
                self.audit
                    .record(AuditEvent::new("reasoning", &self.agent, &name).failure(&e));
                if !self.claims.release(&name, &self.agent, Folder::NeedsAction) {
                    warn!(agent = %self.agent, file = %name, "Failed task could not be returned");
                }
                Ok(TaskOutcome::Returned)
            }
        }
    }

    /// Work every task currently in `Needs_Action/`, in filename order.
    /// Returns the names of completed tasks.
    pub async fn work_pending(&self) -> Vec<String> {
        let tasks = match self.vault.list_markdown(Folder::NeedsAction, "") {
            Ok(tasks) => tasks,
            Err(e) => {
                warn!(agent = %self.agent, error = %e, "Failed to list Needs_Action");
                return Vec::new();
            }
        };
        if !tasks.is_empty() {
            debug!(agent = %self.agent, count = tasks.len(), "Tasks waiting");
        }

        let mut completed = Vec::new();
        for task in tasks {
            match self.work(&task).await {
                Ok(TaskOutcome::Completed) => completed.push(display_name(&task)),
                Ok(_) => {}
                Err(e) => warn!(agent = %self.agent, file = %display_name(&task), error = %e, "Task skipped"),
            }
        }
        completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use backoffice_core::clock::SystemClock;
    use std::fs;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Succeeds unless the task name contains "fail"; records what it saw.
    struct ScriptedReasoner {
        seen: Mutex<Vec<(PathBuf, ReasoningMode)>>,
    }

    #[async_trait]
    impl Reasoner for ScriptedReasoner {
        async fn reason(&self, task: &Path, mode: ReasoningMode) -> Result<String, ActionError> {
            self.seen.lock().unwrap().push((task.to_path_buf(), mode));
            if display_name(task).contains("fail") {
                Err(ActionError::HandlerFailed("model unavailable".to_string()))
            } else {
                Ok("planned".to_string())
            }
        }
    }

    fn setup(mode: ReasoningMode) -> (TempDir, Vault, Arc<ScriptedReasoner>, TaskWorker) {
        let dir = TempDir::new().unwrap();
        let vault = Vault::new(dir.path());
        vault.ensure_layout().unwrap();
        let audit = Arc::new(AuditLogger::new(&vault, Arc::new(SystemClock)));
        let claims = Arc::new(ClaimManager::for_vault(&vault, audit.clone()));
        let reasoner = Arc::new(ScriptedReasoner {
            seen: Mutex::new(Vec::new()),
        });
        let worker = TaskWorker::new(vault.clone(), "local", claims, reasoner.clone(), audit, mode);
        (dir, vault, reasoner, worker)
    }

    fn drop_task(vault: &Vault, name: &str) -> PathBuf {
        let path = vault.path(Folder::NeedsAction).join(name);
        fs::write(&path, "---\ntype: email\nstatus: pending\n---\nbody\n").unwrap();
        path
    }

    #[tokio::test]
    async fn test_success_releases_to_done() {
        let (_dir, vault, reasoner, worker) = setup(ReasoningMode::Full);
        let task = drop_task(&vault, "EMAIL_1.md");

        assert_eq!(worker.work(&task).await.unwrap(), TaskOutcome::Completed);
        assert!(vault.path(Folder::Done).join("EMAIL_1.md").exists());
        assert!(!task.exists());

        let seen = reasoner.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].0.ends_with("In_Progress/local/EMAIL_1.md"));
        assert_eq!(seen[0].1, ReasoningMode::Full);
    }

    #[tokio::test]
    async fn test_failure_returns_to_needs_action() {
        let (_dir, vault, _reasoner, worker) = setup(ReasoningMode::Full);
        let task = drop_task(&vault, "EMAIL_fail.md");

        assert_eq!(worker.work(&task).await.unwrap(), TaskOutcome::Returned);
        assert!(task.exists());
        assert!(!vault.path(Folder::Done).join("EMAIL_fail.md").exists());
    }

    #[tokio::test]
    async fn test_missing_task_is_lost() {
        let (_dir, vault, reasoner, worker) = setup(ReasoningMode::Full);
        let task = vault.path(Folder::NeedsAction).join("EMAIL_gone.md");
        assert_eq!(worker.work(&task).await.unwrap(), TaskOutcome::Lost);
        assert!(reasoner.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_work_pending_in_order() {
        let (_dir, vault, reasoner, worker) = setup(ReasoningMode::DraftOnly);
        drop_task(&vault, "B.md");
        drop_task(&vault, "A.md");
        drop_task(&vault, "C_fail.md");

        let completed = worker.work_pending().await;
        assert_eq!(completed, vec!["A.md", "B.md"]);
        assert_eq!(vault.count(Folder::Done), 2);
        assert_eq!(vault.count(Folder::NeedsAction), 1);
        assert!(reasoner
            .seen
            .lock()
            .unwrap()
            .iter()
            .all(|(_, mode)| *mode == ReasoningMode::DraftOnly));
    }
}
