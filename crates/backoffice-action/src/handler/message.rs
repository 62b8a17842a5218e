//! Message-sending actions (email, WhatsApp, social).
//!
//! Provider clients sit behind [`MessageClient`]; the concrete API wrappers
//! live outside this crate.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use backoffice_core::frontmatter::ApprovalRequest;
use tracing::info;

use crate::error::ActionError;
use crate::handler::ActionHandler;
use crate::types::{ActionResult, SendReceipt};

/// A provider that delivers a message and returns its identifier.
#[async_trait]
pub trait MessageClient: Send + Sync {
    async fn send(&self, to: &str, body: &str) -> Result<SendReceipt, ActionError>;
}

/// Sends the request's reply body to its target.
pub struct MessageSendHandler {
    action: String,
    client: Arc<dyn MessageClient>,
}

impl MessageSendHandler {
    pub fn new(action: impl Into<String>, client: Arc<dyn MessageClient>) -> Self {
        Self {
            action: action.into(),
            client,
        }
    }
}

#[async_trait]
impl ActionHandler for MessageSendHandler {
    fn action(&self) -> &str {
        &self.action
    }

    async fn execute(&self, request: &ApprovalRequest) -> Result<ActionResult, ActionError> {
        let to = request.target();
        if to.is_empty() {
            return Err(ActionError::InvalidPayload(
                "Message recipient must not be empty".to_string(),
            ));
        }
        let body = request
            .reply_body
            .as_deref()
            .ok_or_else(|| ActionError::InvalidPayload("Missing reply body".to_string()))?;

        let receipt = self.client.send(to, body).await?;
        Ok(ActionResult::sent(format!("Sent {} to {}", self.action, to), &receipt))
    }
}

/// Logs the would-be send and returns a synthetic id.
pub struct DryRunClient {
    channel: String,
    counter: AtomicU64,
}

impl DryRunClient {
    pub fn new(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            counter: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl MessageClient for DryRunClient {
    async fn send(&self, to: &str, body: &str) -> Result<SendReceipt, ActionError> {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        let preview: String = body.chars().take(80).collect();
        info!(channel = %self.channel, to = %to, preview = %preview, "[DRY RUN] Message not sent");
        Ok(SendReceipt {
            status: "dry_run".to_string(),
            message_id: format!("dry-run-{}-{}", self.channel, n),
        })
    }
}
