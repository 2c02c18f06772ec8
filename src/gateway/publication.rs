//! Publication gateway: wraps the publish backend with retry and
//! idempotency. Republishing an identical bundle reference to the same
//! target short-circuits to the previously returned live target, so a
//! retried pipeline never creates duplicate artifacts.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::{BackendError, GatewayError, RetryPolicy, call_with_retry};
use crate::store::Bundle;

/// One publish attempt: the bundle to host and where to host it.
#[derive(Debug, Clone)]
pub struct PublishRequest {
    pub bundle: Bundle,
    /// The project's established target, or `None` on an initial deployment
    /// (the backend chooses a fresh target).
    pub target: Option<String>,
    /// Naming hint used by the backend when choosing a fresh target.
    pub slug: String,
}

/// Opaque hosting collaborator: bundle + target in, live target out.
#[async_trait]
pub trait PublicationBackend: Send + Sync {
    async fn publish(&self, request: &PublishRequest) -> Result<String, BackendError>;
}

pub struct PublicationGateway {
    backend: Arc<dyn PublicationBackend>,
    policy: RetryPolicy,
    /// (bundle reference, publish identity) → live target returned.
    published: Mutex<HashMap<(String, String), String>>,
}

/// Cache key for one publish. An explicit target is the identity; without
/// one the slug is, so identical bundles from different projects never
/// collide on a fresh deployment.
fn cache_key(request: &PublishRequest) -> (String, String) {
    let identity = match &request.target {
        Some(target) => format!("target:{}", target),
        None => format!("slug:{}", request.slug),
    };
    (request.bundle.reference.clone(), identity)
}

impl PublicationGateway {
    pub fn new(backend: Arc<dyn PublicationBackend>, policy: RetryPolicy) -> Self {
        Self {
            backend,
            policy,
            published: Mutex::new(HashMap::new()),
        }
    }

    pub async fn publish(&self, request: &PublishRequest) -> Result<String, GatewayError> {
        let key = cache_key(request);
        if let Some(target) = self
            .published
            .lock()
            .ok()
            .and_then(|cache| cache.get(&key).cloned())
        {
            tracing::debug!(
                bundle_ref = %request.bundle.reference,
                target = %target,
                "bundle already published to this target, skipping"
            );
            return Ok(target);
        }

        let backend = Arc::clone(&self.backend);
        let target = call_with_retry(&self.policy, "publication", || {
            let backend = Arc::clone(&backend);
            async move { backend.publish(request).await }
        })
        .await?;

        if let Ok(mut cache) = self.published.lock() {
            cache.insert(key, target.clone());
            // The resolved target also maps to itself, so a later explicit
            // republish of the same pair is recognized.
            cache.insert(
                (
                    request.bundle.reference.clone(),
                    format!("target:{}", target),
                ),
                target.clone(),
            );
        }
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
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

    fn bundle() -> Bundle {
        let mut files = BTreeMap::new();
        files.insert("index.html".to_string(), "<html></html>".to_string());
        Bundle::from_files(files)
    }

    struct CountingBackend {
        calls: AtomicU32,
    }

    #[async_trait]
    impl PublicationBackend for CountingBackend {
        async fn publish(&self, request: &PublishRequest) -> Result<String, BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(request
                .target
                .clone()
                .unwrap_or_else(|| format!("https://owner.github.io/{}/", request.slug)))
        }
    }

    #[tokio::test]
    async fn identical_republish_is_a_no_op_success() {
        let backend = Arc::new(CountingBackend {
            calls: AtomicU32::new(0),
        });
        let gateway = PublicationGateway::new(backend.clone(), fast_policy());

        let request = PublishRequest {
            bundle: bundle(),
            target: Some("https://owner.github.io/todo/".to_string()),
            slug: "todo".to_string(),
        };

        let first = gateway.publish(&request).await.unwrap();
        let second = gateway.publish(&request).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fresh_target_resolution_is_remembered() {
        let backend = Arc::new(CountingBackend {
            calls: AtomicU32::new(0),
        });
        let gateway = PublicationGateway::new(backend.clone(), fast_policy());

        let fresh = PublishRequest {
            bundle: bundle(),
            target: None,
            slug: "todo".to_string(),
        };
        let target = gateway.publish(&fresh).await.unwrap();
        assert_eq!(target, "https://owner.github.io/todo/");

        // Republishing the same bundle to the now-known target hits the cache.
        let explicit = PublishRequest {
            bundle: bundle(),
            target: Some(target.clone()),
            slug: "todo".to_string(),
        };
        assert_eq!(gateway.publish(&explicit).await.unwrap(), target);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn identical_bundles_for_different_slugs_publish_separately() {
        let backend = Arc::new(CountingBackend {
            calls: AtomicU32::new(0),
        });
        let gateway = PublicationGateway::new(backend.clone(), fast_policy());

        // Two fresh deployments of byte-identical bundles: each slug must
        // reach the backend and get its own target.
        let first = PublishRequest {
            bundle: bundle(),
            target: None,
            slug: "project-a".to_string(),
        };
        let second = PublishRequest {
            bundle: bundle(),
            target: None,
            slug: "project-b".to_string(),
        };

        let target_a = gateway.publish(&first).await.unwrap();
        let target_b = gateway.publish(&second).await.unwrap();
        assert_eq!(target_a, "https://owner.github.io/project-a/");
        assert_eq!(target_b, "https://owner.github.io/project-b/");
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);

        // Each slug's own republish still dedupes.
        gateway.publish(&first).await.unwrap();
        gateway.publish(&second).await.unwrap();
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn different_bundles_are_published_separately() {
        let backend = Arc::new(CountingBackend {
            calls: AtomicU32::new(0),
        });
        let gateway = PublicationGateway::new(backend.clone(), fast_policy());

        let mut other_files = BTreeMap::new();
        other_files.insert("index.html".to_string(), "<html>v2</html>".to_string());

        let first = PublishRequest {
            bundle: bundle(),
            target: Some("https://owner.github.io/todo/".to_string()),
            slug: "todo".to_string(),
        };
        let second = PublishRequest {
            bundle: Bundle::from_files(other_files),
            target: Some("https://owner.github.io/todo/".to_string()),
            slug: "todo".to_string(),
        };

        gateway.publish(&first).await.unwrap();
        gateway.publish(&second).await.unwrap();
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
    }
}
