//! Action handler registry and trait definition.
//!
//! Defines the `ActionHandler` async trait, the `ActionDispatcher` seam the
//! approval watcher calls, and the registry that routes an approved request
//! to the handler registered for its action.

pub mod message;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use backoffice_core::frontmatter::ApprovalRequest;
use tracing::{debug, warn};

use crate::error::ActionError;
use crate::rate_limit::RateLimiter;
use crate::types::ActionResult;

pub use message::{DryRunClient, MessageClient, MessageSendHandler};

/// Performs the side effect of one action type.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    /// The `action` front-matter value this handler serves.
    fn action(&self) -> &str;

    async fn execute(&self, request: &ApprovalRequest) -> Result<ActionResult, ActionError>;

    /// One-line description for logs.
    fn describe(&self, request: &ApprovalRequest) -> String {
        format!("{} -> {}", self.action(), request.target())
    }
}

/// Executes an approved request. Injected into the approval watcher.
#[async_trait]
pub trait ActionDispatcher: Send + Sync {
    async fn dispatch(&self, request: &ApprovalRequest) -> Result<ActionResult, ActionError>;
}

/// Handlers keyed by action, gated by an optional rate limiter.
#[derive(Default)]
pub struct ActionRegistry {
    handlers: HashMap<String, Arc<dyn ActionHandler>>,
    limiter: Option<Arc<RateLimiter>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// Register `handler`, replacing any handler for the same action.
    pub fn register(&mut self, handler: Arc<dyn ActionHandler>) {
        let action = handler.action().to_string();
        if self.handlers.insert(action.clone(), handler).is_some() {
            warn!(action = %action, "Replaced existing action handler");
        }
    }

    pub fn get(&self, action: &str) -> Option<Arc<dyn ActionHandler>> {
        self.handlers.get(action).cloned()
    }

    /// Registered action names, sorted.
    pub fn actions(&self) -> Vec<String> {
        let mut actions: Vec<String> = self.handlers.keys().cloned().collect();
        actions.sort();
        actions
    }
}

#[async_trait]
impl ActionDispatcher for ActionRegistry {
    async fn dispatch(&self, request: &ApprovalRequest) -> Result<ActionResult, ActionError> {
        let handler = self
            .get(&request.action)
            .ok_or_else(|| ActionError::UnregisteredHandler(request.action.clone()))?;

        if let Some(limiter) = &self.limiter {
            if !limiter.check_action(&request.action) {
                return Err(ActionError::RateLimited(
                    limiter.category_for(&request.action).to_string(),
                ));
            }
        }

        debug!(action = %handler.describe(request), "Dispatching action");
        handler.execute(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backoffice_core::frontmatter::Document;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHandler {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ActionHandler for CountingHandler {
        fn action(&self) -> &str {
            "social_post"
        }

        async fn execute(&self, _request: &ApprovalRequest) -> Result<ActionResult, ActionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ActionResult {
                success: true,
                message: "Posted".to_string(),
                message_id: Some("post-1".to_string()),
            })
        }
    }

    fn request(action: &str) -> ApprovalRequest {
        ApprovalRequest::from_document(&Document::parse(&format!(
            "---\naction: {}\nrecipient: linkedin\n---\n",
            action
        )))
    }

    #[tokio::test]
    async fn test_dispatch_routes_by_action() {
        let handler = Arc::new(CountingHandler {
            calls: AtomicUsize::new(0),
        });
        let mut registry = ActionRegistry::new();
        registry.register(handler.clone());

        let result = registry.dispatch(&request("social_post")).await.unwrap();
        assert_eq!(result.message_id.as_deref(), Some("post-1"));
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dispatch_unregistered() {
        let registry = ActionRegistry::new();
        let err = registry.dispatch(&request("invoice")).await.unwrap_err();
        assert!(matches!(err, ActionError::UnregisteredHandler(a) if a == "invoice"));
    }

    #[tokio::test]
    async fn test_dispatch_rate_limited_by_category() {
        let handler = Arc::new(CountingHandler {
            calls: AtomicUsize::new(0),
        });
        let limiter = Arc::new(
            RateLimiter::new([("social", 1)]).with_categories(
                [("social_post".to_string(), "social".to_string())]
                    .into_iter()
                    .collect(),
            ),
        );
        let mut registry = ActionRegistry::new().with_rate_limiter(limiter);
        registry.register(handler.clone());

        assert!(registry.dispatch(&request("social_post")).await.is_ok());
        let err = registry.dispatch(&request("social_post")).await.unwrap_err();
        assert!(matches!(err, ActionError::RateLimited(c) if c == "social"));
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_actions_sorted() {
        let mut registry = ActionRegistry::new();
        registry.register(Arc::new(MessageSendHandler::new(
            "whatsapp_reply",
            Arc::new(DryRunClient::new("whatsapp")),
        )));
        registry.register(Arc::new(MessageSendHandler::new(
            "email_send",
            Arc::new(DryRunClient::new("email")),
        )));
        assert_eq!(registry.actions(), vec!["email_send", "whatsapp_reply"]);
        assert!(registry.get("email_send").is_some());
        assert!(registry.get("invoice").is_none());
    }
}
