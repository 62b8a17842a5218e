//! Approval state machine with validated transitions.
//!
//! Pending -> Approved/Rejected (human move) or Expired (sweep), and each
//! of those -> Done. Done is terminal.

use std::fmt;

use backoffice_core::types::ApprovalStatus;
use backoffice_core::vault::Folder;

use crate::error::ActionError;

/// Lifecycle stage of an approval file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Pending,
    Approved,
    Rejected,
    Expired,
    Done,
}

impl Stage {
    /// The folder a file in this stage lives in.
    pub fn folder(self) -> Folder {
        match self {
            Stage::Pending => Folder::PendingApproval,
            Stage::Approved => Folder::Approved,
            Stage::Rejected | Stage::Expired => Folder::Rejected,
            Stage::Done => Folder::Done,
        }
    }

    pub fn from_status(status: ApprovalStatus) -> Option<Stage> {
        match status {
            ApprovalStatus::Pending => Some(Stage::Pending),
            ApprovalStatus::Approved => Some(Stage::Approved),
            ApprovalStatus::Rejected => Some(Stage::Rejected),
            ApprovalStatus::Expired => Some(Stage::Expired),
            ApprovalStatus::NotRequired => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Pending => write!(f, "pending"),
            Stage::Approved => write!(f, "approved"),
            Stage::Rejected => write!(f, "rejected"),
            Stage::Expired => write!(f, "expired"),
            Stage::Done => write!(f, "done"),
        }
    }
}

/// Validate that a stage transition is allowed.
pub fn validate_transition(from: Stage, to: Stage) -> Result<(), ActionError> {
    let valid = matches!(
        (from, to),
        (Stage::Pending, Stage::Approved)
            | (Stage::Pending, Stage::Rejected)
            | (Stage::Pending, Stage::Expired)
            | (Stage::Approved, Stage::Done)
            | (Stage::Rejected, Stage::Done)
            | (Stage::Expired, Stage::Done)
    );

    if valid {
        Ok(())
    } else {
        Err(ActionError::InvalidTransition(from, to))
    }
}
