//! Reasoning engine collaborator.
//!
//! The agents hand each claimed task file to a [`Reasoner`]. The shipped
//! implementation runs an external command with the task path appended.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use backoffice_core::config::AgentConfig;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::ActionError;
use crate::retry::RetryPolicy;

/// Flag passed to the reasoning command in draft-only mode.
pub const DRAFT_FLAG: &str = "--draft-only";

/// Max characters of stderr carried into an error.
const MAX_STDERR_CHARS: usize = 500;

/// How much the reasoner is allowed to do with a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReasoningMode {
    /// Plan and request actions.
    Full,
    /// Write drafts and approval requests only.
    DraftOnly,
}

/// Processes one claimed task file.
#[async_trait]
pub trait Reasoner: Send + Sync {
    /// Returns the engine's output on success.
    async fn reason(&self, task: &Path, mode: ReasoningMode) -> Result<String, ActionError>;
}

/// Runs a configured program once per task.
#[derive(Debug, Clone)]
pub struct CommandReasoner {
    program: String,
    args: Vec<String>,
    timeout: Duration,
    retry: RetryPolicy,
}

impl CommandReasoner {
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Build from the `[agent]` config section. The first element of
    /// `reasoning_command` is the program.
    pub fn from_config(config: &AgentConfig) -> Result<Self, ActionError> {
        let (program, args) = config.reasoning_command.split_first().ok_or_else(|| {
            ActionError::InvalidPayload("agent.reasoning_command is empty".to_string())
        })?;
        Ok(Self::new(
            program.clone(),
            args.to_vec(),
            Duration::from_secs(config.reasoning_timeout_secs),
        )
        .with_retry(RetryPolicy::from(&config.retry)))
    }

    async fn run_once(&self, task: &Path, mode: ReasoningMode) -> Result<String, ActionError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        if mode == ReasoningMode::DraftOnly {
            cmd.arg(DRAFT_FLAG);
        }
        cmd.arg(task)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(program = %self.program, task = %task.display(), ?mode, "Spawning reasoner");
        let child = cmd
            .spawn()
            .map_err(|e| ActionError::HandlerFailed(format!("spawn {}: {}", self.program, e)))?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| ActionError::Timeout(self.timeout.as_secs()))??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stderr: String = stderr.trim().chars().take(MAX_STDERR_CHARS).collect();
            return Err(ActionError::HandlerFailed(format!(
                "{} exited with {}: {}",
                self.program, output.status, stderr
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl Reasoner for CommandReasoner {
    async fn reason(&self, task: &Path, mode: ReasoningMode) -> Result<String, ActionError> {
        let out = self
            .retry
            .run("reasoner", || self.run_once(task, mode))
            .await?;
        info!(task = %task.display(), ?mode, "Reasoner finished");
        Ok(out)
    }
}
