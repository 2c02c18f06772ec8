//! Generation gateway: wraps the code-generation backend with timeout,
//! retry, and output validation. The backend returns raw files; the gateway
//! enforces the bundle contract (an `index.html` entry point must exist)
//! and derives the content-addressed bundle reference.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use super::{BackendError, GatewayError, RetryPolicy, call_with_retry};
use crate::store::Bundle;

/// A file sent along with a round request. `url` may be a data URI, in
/// which case the content is decoded and inlined into the prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    pub url: String,
}

/// An attachment resolved to usable content.
#[derive(Debug, Clone)]
pub struct DecodedAttachment {
    pub name: String,
    pub mime_type: String,
    pub content: String,
}

impl Attachment {
    /// Decode a data URI into its content; non-data URLs are passed through
    /// as references. Decoding failures produce a placeholder rather than
    /// aborting the round.
    pub fn decode(&self) -> DecodedAttachment {
        let Some(rest) = self.url.strip_prefix("data:") else {
            return DecodedAttachment {
                name: self.name.clone(),
                mime_type: "text/plain".to_string(),
                content: format!("[External URL: {}]", self.url),
            };
        };

        let Some((header, payload)) = rest.split_once(',') else {
            return DecodedAttachment {
                name: self.name.clone(),
                mime_type: "text/plain".to_string(),
                content: "[Failed to decode: malformed data URI]".to_string(),
            };
        };

        let mime_type = header
            .split(';')
            .next()
            .filter(|m| !m.is_empty())
            .unwrap_or("text/plain")
            .to_string();

        let content = if header.contains("base64") {
            match base64::engine::general_purpose::STANDARD.decode(payload) {
                Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                Err(e) => {
                    tracing::warn!(name = %self.name, error = %e, "failed to decode attachment");
                    format!("[Failed to decode: {}]", e)
                }
            }
        } else {
            payload.to_string()
        };

        DecodedAttachment {
            name: self.name.clone(),
            mime_type,
            content,
        }
    }
}

/// Everything the backend needs to produce a bundle for one round.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub instruction: String,
    /// Evaluation criteria the generated application must satisfy.
    pub checks: Vec<String>,
    pub attachments: Vec<Attachment>,
    /// The previous round's bundle, when this round is a revision.
    pub prior_bundle: Option<Bundle>,
}

/// Opaque code-generation collaborator: prompt in, files out, may fail or
/// time out. Failures are classified by the implementation.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<BTreeMap<String, String>, BackendError>;
}

pub struct GenerationGateway {
    backend: Arc<dyn GenerationBackend>,
    policy: RetryPolicy,
}

impl GenerationGateway {
    pub fn new(backend: Arc<dyn GenerationBackend>, policy: RetryPolicy) -> Self {
        Self { backend, policy }
    }

    /// Generate and validate a bundle. Malformed output is `Rejected` and
    /// not retried; transient backend failures retry within the policy.
    pub async fn generate(&self, request: &GenerationRequest) -> Result<Bundle, GatewayError> {
        let backend = Arc::clone(&self.backend);
        call_with_retry(&self.policy, "generation", || {
            let backend = Arc::clone(&backend);
            async move {
                let files = backend.generate(request).await?;
                let files = normalize_files(files).map_err(BackendError::rejected)?;
                Ok(Bundle::from_files(files))
            }
        })
        .await
    }
}

/// Enforce the static-site entry-point contract: `index.html` must exist.
/// A lone `*.html` file is renamed rather than rejected, matching how
/// single-file generations commonly come back.
fn normalize_files(
    mut files: BTreeMap<String, String>,
) -> Result<BTreeMap<String, String>, String> {
    if files.is_empty() {
        return Err("generated bundle contains no files".to_string());
    }
    if files.contains_key("index.html") {
        return Ok(files);
    }
    let html_files: Vec<String> = files
        .keys()
        .filter(|k| k.ends_with(".html"))
        .cloned()
        .collect();
    match html_files.as_slice() {
        [only] => {
            let content = files.remove(only.as_str()).unwrap_or_default();
            files.insert("index.html".to_string(), content);
            Ok(files)
        }
        _ => Err("generated bundle missing index.html".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::FailureKind;
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

    fn request(instruction: &str) -> GenerationRequest {
        GenerationRequest {
            instruction: instruction.to_string(),
            checks: vec![],
            attachments: vec![],
            prior_bundle: None,
        }
    }

    struct StaticBackend {
        files: BTreeMap<String, String>,
        calls: AtomicU32,
    }

    #[async_trait]
    impl GenerationBackend for StaticBackend {
        async fn generate(
            &self,
            _request: &GenerationRequest,
        ) -> Result<BTreeMap<String, String>, BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.files.clone())
        }
    }

    #[test]
    fn normalize_keeps_index_html() {
        let mut files = BTreeMap::new();
        files.insert("index.html".to_string(), "<html></html>".to_string());
        files.insert("app.js".to_string(), "init()".to_string());
        let out = normalize_files(files).unwrap();
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn normalize_renames_lone_html_file() {
        let mut files = BTreeMap::new();
        files.insert("todo.html".to_string(), "<html>todo</html>".to_string());
        let out = normalize_files(files).unwrap();
        assert_eq!(out.get("index.html").map(String::as_str), Some("<html>todo</html>"));
        assert!(!out.contains_key("todo.html"));
    }

    #[test]
    fn normalize_rejects_missing_entry_point() {
        let mut files = BTreeMap::new();
        files.insert("a.html".to_string(), "a".to_string());
        files.insert("b.html".to_string(), "b".to_string());
        assert!(normalize_files(files).is_err());
        assert!(normalize_files(BTreeMap::new()).is_err());
    }

    #[tokio::test]
    async fn malformed_output_is_rejected_without_retry() {
        let backend = Arc::new(StaticBackend {
            files: BTreeMap::new(),
            calls: AtomicU32::new(0),
        });
        let gateway = GenerationGateway::new(backend.clone(), fast_policy());
        let err = gateway.generate(&request("build it")).await.unwrap_err();
        assert_eq!(err.kind, FailureKind::Rejected);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn valid_output_becomes_content_addressed_bundle() {
        let mut files = BTreeMap::new();
        files.insert("index.html".to_string(), "<html></html>".to_string());
        let backend = Arc::new(StaticBackend {
            files,
            calls: AtomicU32::new(0),
        });
        let gateway = GenerationGateway::new(backend, fast_policy());
        let bundle = gateway.generate(&request("build it")).await.unwrap();
        assert_eq!(bundle.reference.len(), 64);
        assert!(bundle.files.contains_key("index.html"));
    }

    #[test]
    fn attachment_decodes_base64_data_uri() {
        let att = Attachment {
            name: "notes.txt".to_string(),
            url: "data:text/plain;base64,aGVsbG8=".to_string(),
        };
        let decoded = att.decode();
        assert_eq!(decoded.content, "hello");
        assert_eq!(decoded.mime_type, "text/plain");
    }

    #[test]
    fn attachment_passes_plain_data_uri_through() {
        let att = Attachment {
            name: "inline.csv".to_string(),
            url: "data:text/csv,a,b,c".to_string(),
        };
        assert_eq!(att.decode().content, "a,b,c");
    }

    #[test]
    fn attachment_keeps_external_url_as_reference() {
        let att = Attachment {
            name: "logo.png".to_string(),
            url: "https://example.com/logo.png".to_string(),
        };
        let decoded = att.decode();
        assert!(decoded.content.contains("https://example.com/logo.png"));
    }

    #[test]
    fn attachment_decode_failure_is_non_fatal() {
        let att = Attachment {
            name: "bad.bin".to_string(),
            url: "data:application/octet-stream;base64,!!!not-base64!!!".to_string(),
        };
        assert!(att.decode().content.starts_with("[Failed to decode"));
    }
}
