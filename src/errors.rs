//! Typed error hierarchy for the pagesmith orchestrator.
//!
//! Three top-level enums cover the three subsystems:
//! - `OrchestratorError` — round submission and pipeline failures
//! - `StoreError` — artifact store and project registry failures
//! - `GatewayError` — classified external-call failures (see `gateway`)

use thiserror::Error;

/// Errors surfaced by `RoundOrchestrator::submit_round`.
///
/// Stage failures (generation, publication, notification) do not appear
/// here: they terminate the round, not the call, and are reported through
/// the returned `RoundResult` with a `FailureReason` attributing the
/// failure to exactly one pipeline stage.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("A round is already in flight for project {project_id}")]
    Conflict { project_id: String },

    #[error("Invalid round request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors from the artifact store and project registry.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Project {id} not found")]
    ProjectNotFound { id: String },

    #[error("Round {number} not found for project {project_id}")]
    RoundNotFound { project_id: String, number: i64 },

    #[error("Bundle {reference} not found")]
    BundleNotFound { reference: String },

    #[error("Round {number} for project {project_id} is still in flight")]
    RoundInFlight { project_id: String, number: i64 },

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl OrchestratorError {
    /// Whether the caller may retry the same submission after backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}
