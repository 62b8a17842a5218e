//! Retry with exponential backoff for provider calls.
//!
//! A failed attempt is retried after `base_delay * 2^(attempt-1)`, capped
//! at `max_delay`. Payload errors are not retried. Exhausting the attempts
//! returns the last error; the caller treats that as terminal for the cycle.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backoffice_core::config::RetryConfig;
use tracing::warn;

use crate::error::ActionError;
use crate::handler::MessageClient;
use crate::types::SendReceipt;

/// Backoff settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the initial one).
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }
}

impl RetryPolicy {
    /// Delay after failed attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Run `op` until it succeeds, fails with a non-transient error, or
    /// runs out of attempts.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, ActionError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ActionError>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if !is_transient(&e) || attempt >= self.max_attempts => return Err(e),
                Err(e) => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        operation = %label,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// Errors worth another attempt. Bad input and policy refusals are not.
pub fn is_transient(err: &ActionError) -> bool {
    !matches!(
        err,
        ActionError::InvalidPayload(_)
            | ActionError::UnregisteredHandler(_)
            | ActionError::RateLimited(_)
            | ActionError::InvalidTransition(..)
    )
}

/// A [`MessageClient`] that retries the inner client's sends.
pub struct RetryingClient {
    inner: Arc<dyn MessageClient>,
    policy: RetryPolicy,
}

impl RetryingClient {
    pub fn new(inner: Arc<dyn MessageClient>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl MessageClient for RetryingClient {
    async fn send(&self, to: &str, body: &str) -> Result<SendReceipt, ActionError> {
        self.policy
            .run("send", || self.inner.send(to, body))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
        }
    }

    struct FlakyClient {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl MessageClient for FlakyClient {
        async fn send(&self, _to: &str, _body: &str) -> Result<SendReceipt, ActionError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= self.failures {
                return Err(ActionError::HandlerFailed(format!("503 on call {}", n)));
            }
            Ok(SendReceipt {
                status: "sent".to_string(),
                message_id: format!("m{}", n),
            })
        }
    }

    #[test]
    fn test_delay_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for(7), Duration::from_secs(60));
        assert_eq!(policy.delay_for(40), Duration::from_secs(60));
    }

    #[test]
    fn test_from_config() {
        let policy = RetryPolicy::from(&RetryConfig {
            max_attempts: 0,
            base_delay_ms: 250,
            max_delay_ms: 1_000,
        });
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.base_delay, Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_retrying_client_recovers() {
        let inner = Arc::new(FlakyClient {
            failures: 2,
            calls: AtomicU32::new(0),
        });
        let client = RetryingClient::new(inner.clone(), fast_policy(3));
        let receipt = client.send("+1555", "hi").await.unwrap();
        assert_eq!(receipt.message_id, "m3");
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retrying_client_exhausts() {
        let inner = Arc::new(FlakyClient {
            failures: 10,
            calls: AtomicU32::new(0),
        });
        let client = RetryingClient::new(inner.clone(), fast_policy(3));
        let err = client.send("+1555", "hi").await.unwrap_err();
        assert!(err.to_string().contains("503 on call 3"));
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_payload_errors_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = fast_policy(5)
            .run("validate", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ActionError::InvalidPayload("no body".to_string())) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
