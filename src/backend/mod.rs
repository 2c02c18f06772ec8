//! Concrete implementations of the three external collaborators: an
//! LLM code-generation backend, a GitHub Pages publisher, and a webhook
//! evaluator notifier. The orchestrator only ever sees these through the
//! gateway traits.

pub mod llm;
pub mod pages;
pub mod webhook;

pub use llm::LlmCodegenBackend;
pub use pages::GitHubPagesBackend;
pub use webhook::WebhookNotifier;
