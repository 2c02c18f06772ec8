//! Gateways wrap the three external collaborators (generation, publication,
//! notification) with a bounded timeout, bounded exponential-backoff retry,
//! and failure classification. Transient errors are retried locally and
//! never surface past the gateway boundary unless retries exhaust; the
//! orchestrator's control flow carries no service-specific retry logic.

pub mod generation;
pub mod notification;
pub mod publication;

pub use generation::{
    Attachment, DecodedAttachment, GenerationBackend, GenerationGateway, GenerationRequest,
};
pub use notification::{Notification, NotificationBackend, NotificationGateway};
pub use publication::{PublicationBackend, PublicationGateway, PublishRequest};

use std::future::Future;
use std::time::Duration;

use thiserror::Error;

/// Classification of an external-call failure. Only `Transient` and
/// `Timeout` are retried; `Rejected` (malformed output, invalid target,
/// authorization) fails immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Timeout,
    Rejected,
    Transient,
    Unknown,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Rejected => "rejected",
            Self::Transient => "transient",
            Self::Unknown => "unknown",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout | Self::Transient)
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single classified failure from a backend call.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct BackendError {
    pub kind: FailureKind,
    pub message: String,
}

impl BackendError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Transient,
            message: message.into(),
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Rejected,
            message: message.into(),
        }
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Unknown,
            message: message.into(),
        }
    }
}

/// Failure returned by a gateway after its retry budget is spent (or
/// immediately, for non-retryable classifications).
#[derive(Debug, Error)]
#[error("{kind} failure after {attempts} attempt(s): {message}")]
pub struct GatewayError {
    pub kind: FailureKind,
    pub message: String,
    pub attempts: u32,
}

impl GatewayError {
    pub fn new(kind: FailureKind, message: impl Into<String>, attempts: u32) -> Self {
        Self {
            kind,
            message: message.into(),
            attempts,
        }
    }
}

/// Per-gateway retry policy: bounded attempts, doubling delay with a cap,
/// and a per-call timeout.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub call_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(32),
            call_timeout: Duration::from_secs(120),
        }
    }
}

/// Drive one external operation through the retry policy.
///
/// Each attempt is bounded by `call_timeout`; an elapsed timeout is
/// classified as `FailureKind::Timeout` and retried like a transient error.
pub async fn call_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    mut call: F,
) -> Result<T, GatewayError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, BackendError>>,
{
    let mut delay = policy.initial_delay;
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let (kind, message) = match tokio::time::timeout(policy.call_timeout, call()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(err)) => (err.kind, err.message),
            Err(_) => (
                FailureKind::Timeout,
                format!(
                    "{} timed out after {}s",
                    operation,
                    policy.call_timeout.as_secs()
                ),
            ),
        };

        if !kind.is_retryable() || attempt >= policy.max_attempts {
            return Err(GatewayError::new(kind, message, attempt));
        }

        tracing::warn!(
            operation,
            attempt,
            kind = %kind,
            error = %message,
            delay_ms = delay.as_millis() as u64,
            "external call failed, retrying after backoff"
        );
        tokio::time::sleep(delay).await;
        delay = std::cmp::min(delay * 2, policy.max_delay);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            call_timeout: Duration::from_millis(50),
        }
    }

    #[tokio::test]
    async fn transient_failure_is_retried_until_success() {
        let calls = AtomicU32::new(0);
        let result = call_with_retry(&fast_policy(), "test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(BackendError::transient("503 Service Unavailable"))
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn rejected_failure_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = call_with_retry(&fast_policy(), "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(BackendError::rejected("malformed output")) }
        })
        .await;
        let err = result.unwrap_err();
        assert_eq!(err.kind, FailureKind::Rejected);
        assert_eq!(err.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausted_retries_report_attempt_count() {
        let result: Result<(), _> = call_with_retry(&fast_policy(), "test", || async {
            Err(BackendError::transient("502 Bad Gateway"))
        })
        .await;
        let err = result.unwrap_err();
        assert_eq!(err.kind, FailureKind::Transient);
        assert_eq!(err.attempts, 3);
    }

    #[tokio::test]
    async fn slow_call_is_classified_as_timeout() {
        let policy = RetryPolicy {
            max_attempts: 2,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            call_timeout: Duration::from_millis(5),
        };
        let result: Result<(), _> = call_with_retry(&policy, "slow", || async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        })
        .await;
        let err = result.unwrap_err();
        assert_eq!(err.kind, FailureKind::Timeout);
        assert_eq!(err.attempts, 2);
        assert!(err.message.contains("slow"));
    }

    #[test]
    fn request_types_are_reachable_from_the_gateway_root() {
        // Consumers import these through `gateway`, not the submodules.
        let attachment = super::Attachment {
            name: "notes.txt".to_string(),
            url: "data:text/plain,hello".to_string(),
        };
        let request = super::GenerationRequest {
            instruction: "build it".to_string(),
            checks: vec![],
            attachments: vec![attachment],
            prior_bundle: None,
        };
        assert_eq!(request.attachments[0].decode().content, "hello");
    }

    #[test]
    fn failure_kind_retryability() {
        assert!(FailureKind::Timeout.is_retryable());
        assert!(FailureKind::Transient.is_retryable());
        assert!(!FailureKind::Rejected.is_retryable());
        assert!(!FailureKind::Unknown.is_retryable());
    }
}
