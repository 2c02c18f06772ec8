//! Environment-driven runtime settings. Loaded once at startup; a `.env`
//! file is honored when present (see `main`).

use std::time::Duration;

use anyhow::{Context, Result, anyhow};

use crate::gateway::RetryPolicy;

#[derive(Debug, Clone)]
pub struct Settings {
    /// Shared secret required on inbound round requests.
    pub app_secret: String,

    // Publication backend (GitHub Pages)
    pub github_token: String,
    pub github_owner: String,

    // Generation backend
    pub llm_api_key: String,
    pub llm_api_url: String,
    pub llm_model: String,

    // Notification backend
    pub evaluation_url: String,

    // Retry policy knobs, shared defaults across gateways
    pub max_retries: u32,
    pub initial_retry_delay_secs: u64,
    pub max_retry_delay_secs: u64,
    pub generation_timeout_secs: u64,
    pub publication_timeout_secs: u64,
    pub notification_timeout_secs: u64,

    // Server
    pub host: String,
    pub port: u16,
}

impl Settings {
    /// Read settings from process environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through an arbitrary lookup, so tests can supply
    /// values without mutating the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| -> Result<String> {
            lookup(key).ok_or_else(|| anyhow!("Missing required environment variable {}", key))
        };
        let or_default = |key: &str, default: &str| -> String {
            lookup(key).unwrap_or_else(|| default.to_string())
        };

        let port: u16 = or_default("PORT", "8000")
            .parse()
            .context("PORT must be a valid port number")?;
        let max_retries: u32 = or_default("MAX_RETRIES", "3")
            .parse()
            .context("MAX_RETRIES must be an integer")?;
        let parse_secs = |key: &str, default: &str| -> Result<u64> {
            or_default(key, default)
                .parse()
                .with_context(|| format!("{} must be an integer number of seconds", key))
        };

        Ok(Self {
            app_secret: required("APP_SECRET")?,
            github_token: required("GITHUB_TOKEN")?,
            github_owner: required("GITHUB_OWNER")?,
            llm_api_key: required("LLM_API_KEY")?,
            llm_api_url: or_default(
                "LLM_API_URL",
                "https://generativelanguage.googleapis.com/v1beta",
            ),
            llm_model: or_default("LLM_MODEL", "gemini-2.5-pro"),
            evaluation_url: required("EVALUATION_URL")?,
            max_retries,
            initial_retry_delay_secs: parse_secs("INITIAL_RETRY_DELAY_SECS", "1")?,
            max_retry_delay_secs: parse_secs("MAX_RETRY_DELAY_SECS", "32")?,
            generation_timeout_secs: parse_secs("GENERATION_TIMEOUT_SECS", "300")?,
            publication_timeout_secs: parse_secs("PUBLICATION_TIMEOUT_SECS", "180")?,
            notification_timeout_secs: parse_secs("NOTIFICATION_TIMEOUT_SECS", "30")?,
            host: or_default("HOST", "0.0.0.0"),
            port,
        })
    }

    fn policy(&self, call_timeout_secs: u64) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_retries,
            initial_delay: Duration::from_secs(self.initial_retry_delay_secs),
            max_delay: Duration::from_secs(self.max_retry_delay_secs),
            call_timeout: Duration::from_secs(call_timeout_secs),
        }
    }

    pub fn generation_policy(&self) -> RetryPolicy {
        self.policy(self.generation_timeout_secs)
    }

    pub fn publication_policy(&self) -> RetryPolicy {
        self.policy(self.publication_timeout_secs)
    }

    pub fn notification_policy(&self) -> RetryPolicy {
        self.policy(self.notification_timeout_secs)
    }
}
