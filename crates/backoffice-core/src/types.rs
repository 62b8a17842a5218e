//! Shared enumerations for vault files and audit entries.
//!
//! Every enum serializes as `snake_case`, which is also the spelling used
//! in front matter and in the audit log.

use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// Approval / Audit
// =============================================================================

/// Approval state of a request, and of an audited action.
///
/// `NotRequired` only appears in the audit log; approval files use the
/// other four.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    NotRequired,
    Pending,
    Approved,
    Rejected,
    Expired,
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApprovalStatus::NotRequired => write!(f, "not_required"),
            ApprovalStatus::Pending => write!(f, "pending"),
            ApprovalStatus::Approved => write!(f, "approved"),
            ApprovalStatus::Rejected => write!(f, "rejected"),
            ApprovalStatus::Expired => write!(f, "expired"),
        }
    }
}

impl std::str::FromStr for ApprovalStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_required" => Ok(ApprovalStatus::NotRequired),
            "pending" => Ok(ApprovalStatus::Pending),
            "approved" => Ok(ApprovalStatus::Approved),
            "rejected" => Ok(ApprovalStatus::Rejected),
            "expired" => Ok(ApprovalStatus::Expired),
            _ => Err(format!("Unknown approval status: {}", s)),
        }
    }
}

/// Outcome recorded in an audit entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditResult {
    Success,
    Failure,
}

impl fmt::Display for AuditResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditResult::Success => write!(f, "success"),
            AuditResult::Failure => write!(f, "failure"),
        }
    }
}

// =============================================================================
// Task Items
// =============================================================================

/// Source channel of an inbound task item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Email,
    Whatsapp,
    FileDrop,
    Alert,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskKind::Email => write!(f, "email"),
            TaskKind::Whatsapp => write!(f, "whatsapp"),
            TaskKind::FileDrop => write!(f, "file_drop"),
            TaskKind::Alert => write!(f, "alert"),
        }
    }
}

impl std::str::FromStr for TaskKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "email" => Ok(TaskKind::Email),
            "whatsapp" => Ok(TaskKind::Whatsapp),
            "file_drop" => Ok(TaskKind::FileDrop),
            "alert" => Ok(TaskKind::Alert),
            _ => Err(format!("Unknown task type: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    #[default]
    Normal,
    Low,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::High => write!(f, "high"),
            Priority::Normal => write!(f, "normal"),
            Priority::Low => write!(f, "low"),
        }
    }
}

impl std::str::FromStr for Priority {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "high" => Ok(Priority::High),
            "normal" => Ok(Priority::Normal),
            "low" => Ok(Priority::Low),
            _ => Err(format!("Unknown priority: {}", s)),
        }
    }
}

/// Status field of a task item file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    Replied,
    Done,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Replied => write!(f, "replied"),
            TaskStatus::Done => write!(f, "done"),
        }
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "replied" => Ok(TaskStatus::Replied),
            "done" => Ok(TaskStatus::Done),
            _ => Err(format!("Unknown task status: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_approval_status_display_matches_serde() {
        for status in [
            ApprovalStatus::NotRequired,
            ApprovalStatus::Pending,
            ApprovalStatus::Approved,
            ApprovalStatus::Rejected,
            ApprovalStatus::Expired,
        ] {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status));
            assert_eq!(status.to_string().parse::<ApprovalStatus>().unwrap(), status);
        }
    }

    #[test]
    fn test_approval_status_unknown() {
        assert!("approvedish".parse::<ApprovalStatus>().is_err());
    }

    #[test]
    fn test_task_kind_from_str() {
        assert_eq!("email".parse::<TaskKind>().unwrap(), TaskKind::Email);
        assert_eq!("whatsapp".parse::<TaskKind>().unwrap(), TaskKind::Whatsapp);
        assert_eq!("file_drop".parse::<TaskKind>().unwrap(), TaskKind::FileDrop);
        assert_eq!("alert".parse::<TaskKind>().unwrap(), TaskKind::Alert);
        assert!("fax".parse::<TaskKind>().is_err());
    }

    #[test]
    fn test_priority_default_is_normal() {
        assert_eq!(Priority::default(), Priority::Normal);
        assert_eq!("high".parse::<Priority>().unwrap(), Priority::High);
    }

    #[test]
    fn test_task_status_display() {
        assert_eq!(TaskStatus::Pending.to_string(), "pending");
        assert_eq!(TaskStatus::Replied.to_string(), "replied");
        assert_eq!(TaskStatus::Done.to_string(), "done");
    }

    #[test]
    fn test_audit_result_serde() {
        assert_eq!(
            serde_json::to_string(&AuditResult::Failure).unwrap(),
            "\"failure\""
        );
    }
}
