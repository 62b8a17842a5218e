//! Shared types for action dispatch.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A human decision, inferred from the folder an approval file was moved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Decision {
    Approved,
    Rejected,
}

impl Decision {
    /// `Approved/` -> `Approved`, `Rejected/` -> `Rejected`.
    pub fn from_folder_name(name: &str) -> Option<Decision> {
        match name {
            "Approved" => Some(Decision::Approved),
            "Rejected" => Some(Decision::Rejected),
            _ => None,
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Approved => write!(f, "approved"),
            Decision::Rejected => write!(f, "rejected"),
        }
    }
}

/// Provider acknowledgement of a send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendReceipt {
    pub status: String,
    pub message_id: String,
}

/// Result returned by action handlers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    pub success: bool,
    pub message: String,
    /// Provider identifier of the effect, when there is one.
    pub message_id: Option<String>,
}

impl ActionResult {
    pub fn sent(message: impl Into<String>, receipt: &SendReceipt) -> Self {
        Self {
            success: true,
            message: message.into(),
            message_id: Some(receipt.message_id.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decision_from_folder_name() {
        assert_eq!(Decision::from_folder_name("Approved"), Some(Decision::Approved));
        assert_eq!(Decision::from_folder_name("Rejected"), Some(Decision::Rejected));
        assert_eq!(Decision::from_folder_name("Done"), None);
        assert_eq!(Decision::from_folder_name("approved"), None);
    }

    #[test]
    fn test_decision_display() {
        assert_eq!(Decision::Approved.to_string(), "approved");
        assert_eq!(Decision::Rejected.to_string(), "rejected");
    }

    #[test]
    fn test_send_receipt_json_shape() {
        let receipt: SendReceipt =
            serde_json::from_str(r#"{"status":"sent","message_id":"abc123"}"#).unwrap();
        assert_eq!(receipt.message_id, "abc123");

        let result = ActionResult::sent("Sent", &receipt);
        assert!(result.success);
        assert_eq!(result.message_id.as_deref(), Some("abc123"));
    }
}
