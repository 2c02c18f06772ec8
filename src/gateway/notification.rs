//! Notification gateway: wraps the evaluator notification with retry,
//! providing at-least-once delivery. A retried delivery may reach the
//! receiver more than once; the receiver is expected to tolerate
//! duplicates keyed by (project, round).

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use super::{BackendError, GatewayError, RetryPolicy, call_with_retry};

/// Deployment details delivered to the evaluator.
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub project_id: String,
    pub round_number: i64,
    pub target: String,
    pub bundle_ref: String,
}

/// Opaque notification collaborator: payload out, ack or classified
/// failure in.
#[async_trait]
pub trait NotificationBackend: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<(), BackendError>;
}

pub struct NotificationGateway {
    backend: Arc<dyn NotificationBackend>,
    policy: RetryPolicy,
}

impl NotificationGateway {
    pub fn new(backend: Arc<dyn NotificationBackend>, policy: RetryPolicy) -> Self {
        Self { backend, policy }
    }

    pub async fn notify(&self, notification: &Notification) -> Result<(), GatewayError> {
        let backend = Arc::clone(&self.backend);
        call_with_retry(&self.policy, "notification", || {
            let backend = Arc::clone(&backend);
            async move { backend.notify(notification).await }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::FailureKind;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            call_timeout: Duration::from_millis(100),
        }
    }

    fn notification() -> Notification {
        Notification {
            project_id: "todo-app".to_string(),
            round_number: 1,
            target: "https://owner.github.io/todo-app/".to_string(),
            bundle_ref: "abc123".to_string(),
        }
    }

    struct FlakyBackend {
        failures_before_success: u32,
        attempts: AtomicU32,
        delivered: Mutex<Vec<(String, i64)>>,
    }

    #[async_trait]
    impl NotificationBackend for FlakyBackend {
        async fn notify(&self, n: &Notification) -> Result<(), BackendError> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            if attempt < self.failures_before_success {
                return Err(BackendError::transient("connection reset"));
            }
            self.delivered
                .lock()
                .unwrap()
                .push((n.project_id.clone(), n.round_number));
            Ok(())
        }
    }

    #[tokio::test]
    async fn delivery_retries_until_acked() {
        let backend = Arc::new(FlakyBackend {
            failures_before_success: 2,
            attempts: AtomicU32::new(0),
            delivered: Mutex::new(Vec::new()),
        });
        let gateway = NotificationGateway::new(backend.clone(), fast_policy());

        gateway.notify(&notification()).await.unwrap();
        assert_eq!(backend.attempts.load(Ordering::SeqCst), 3);
        assert_eq!(backend.delivered.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn exhausted_delivery_surfaces_transient_failure() {
        let backend = Arc::new(FlakyBackend {
            failures_before_success: u32::MAX,
            attempts: AtomicU32::new(0),
            delivered: Mutex::new(Vec::new()),
        });
        let gateway = NotificationGateway::new(backend, fast_policy());

        let err = gateway.notify(&notification()).await.unwrap_err();
        assert_eq!(err.kind, FailureKind::Transient);
        assert_eq!(err.attempts, 3);
    }
}
