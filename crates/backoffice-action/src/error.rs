//! Error types for claim, approval and dispatch.

use crate::approval::lifecycle::Stage;
use backoffice_core::error::VaultError;

/// Errors from approval handling and action execution.
#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error("Action handler failed: {0}")]
    HandlerFailed(String),
    #[error("Action type not registered: {0}")]
    UnregisteredHandler(String),
    #[error("Payload validation failed: {0}")]
    InvalidPayload(String),
    #[error("Action execution timed out after {0} seconds")]
    Timeout(u64),
    #[error("Rate limit reached for {0}")]
    RateLimited(String),
    #[error("Invalid approval transition: {0} -> {1}")]
    InvalidTransition(Stage, Stage),
    #[error("Vault error: {0}")]
    Vault(#[from] VaultError),
    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),
}

impl From<std::io::Error> for ActionError {
    fn from(err: std::io::Error) -> Self {
        ActionError::Vault(VaultError::Io(err))
    }
}

/// Errors from the job scheduler.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("Invalid cron expression '{0}': {1}")]
    InvalidCron(String, String),
    #[error("Job already registered: {0}")]
    DuplicateJob(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_error_display() {
        let err = ActionError::HandlerFailed("connection reset".to_string());
        assert_eq!(err.to_string(), "Action handler failed: connection reset");

        let err = ActionError::UnregisteredHandler("invoice".to_string());
        assert_eq!(err.to_string(), "Action type not registered: invoice");

        let err = ActionError::Timeout(30);
        assert_eq!(err.to_string(), "Action execution timed out after 30 seconds");

        let err = ActionError::RateLimited("email".to_string());
        assert_eq!(err.to_string(), "Rate limit reached for email");
    }

    #[test]
    fn test_invalid_transition_display() {
        let err = ActionError::InvalidTransition(Stage::Done, Stage::Pending);
        assert_eq!(err.to_string(), "Invalid approval transition: done -> pending");
    }

    #[test]
    fn test_action_error_from_vault_error() {
        let err: ActionError = VaultError::Config("bad".to_string()).into();
        assert!(matches!(err, ActionError::Vault(_)));
        assert!(err.to_string().contains("bad"));
    }

    #[test]
    fn test_action_error_from_io() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: ActionError = io.into();
        assert!(matches!(err, ActionError::Vault(VaultError::Io(_))));
    }

    #[test]
    fn test_scheduler_error_display() {
        let err = SchedulerError::InvalidCron("61 * *".to_string(), "minute out of range".to_string());
        assert_eq!(
            err.to_string(),
            "Invalid cron expression '61 * *': minute out of range"
        );
        let err = SchedulerError::DuplicateJob("sweep".to_string());
        assert_eq!(err.to_string(), "Job already registered: sweep");
    }
}
