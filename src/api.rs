use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;

use crate::errors::OrchestratorError;
use crate::gateway::Attachment;
use crate::orchestrator::{RoundOrchestrator, RoundRequest};

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub orchestrator: Arc<RoundOrchestrator>,
    pub app_secret: String,
}

pub type SharedState = Arc<AppState>;

// ── Request payload types ─────────────────────────────────────────────

#[derive(Deserialize)]
pub struct SubmitRoundRequest {
    pub secret: String,
    /// Absent for round 1 of a new project; an identifier is derived from
    /// the instruction.
    pub project_id: Option<String>,
    pub instruction: String,
    #[serde(default)]
    pub checks: Vec<String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

// ── Error handling ────────────────────────────────────────────────────

pub enum ApiError {
    Unauthorized,
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "Invalid secret".to_string()),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

impl From<OrchestratorError> for ApiError {
    fn from(err: OrchestratorError) -> Self {
        match err {
            OrchestratorError::Conflict { .. } => ApiError::Conflict(err.to_string()),
            OrchestratorError::InvalidRequest(msg) => ApiError::BadRequest(msg),
            OrchestratorError::Store(e) => ApiError::Internal(e.to_string()),
        }
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/api/rounds", post(submit_round))
        .route("/api/projects/{id}", get(get_project))
        .route("/api/projects/{id}/rounds", get(list_rounds))
        .route("/api/projects/{id}/rounds/{number}", get(get_round))
        .route(
            "/api/projects/{id}/rounds/{number}/transitions",
            get(list_transitions),
        )
        .route("/health", get(health_check))
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

async fn submit_round(
    State(state): State<SharedState>,
    Json(payload): Json<SubmitRoundRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if payload.secret != state.app_secret {
        tracing::warn!("round request with invalid secret rejected");
        return Err(ApiError::Unauthorized);
    }
    if payload.instruction.trim().is_empty() {
        return Err(ApiError::BadRequest("instruction must not be empty".to_string()));
    }

    let project_id = payload
        .project_id
        .clone()
        .unwrap_or_else(|| new_project_id(&payload.instruction));

    let request = RoundRequest {
        instruction: payload.instruction,
        checks: payload.checks,
        attachments: payload.attachments,
    };

    let result = state.orchestrator.submit_round(&project_id, request).await?;
    Ok(Json(result))
}

async fn get_project(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let project = state
        .orchestrator
        .get_project(&id)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .ok_or_else(|| ApiError::NotFound(format!("Project {} not found", id)))?;
    Ok(Json(project))
}

async fn list_rounds(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let rounds = state
        .orchestrator
        .list_rounds(&id)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(rounds))
}

async fn get_round(
    State(state): State<SharedState>,
    Path((id, number)): Path<(String, i64)>,
) -> Result<impl IntoResponse, ApiError> {
    let round = state
        .orchestrator
        .get_round(&id, number)
        .await
        .map_err(|e| match e {
            crate::errors::StoreError::RoundNotFound { .. } => ApiError::NotFound(e.to_string()),
            other => ApiError::Internal(other.to_string()),
        })?;
    Ok(Json(round))
}

async fn list_transitions(
    State(state): State<SharedState>,
    Path((id, number)): Path<(String, i64)>,
) -> Result<impl IntoResponse, ApiError> {
    let transitions = state
        .orchestrator
        .round_transitions(&id, number)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(transitions))
}

/// Derive a fresh project identifier from the instruction text.
fn new_project_id(instruction: &str) -> String {
    let slug = crate::backend::pages::slugify(instruction, 32);
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    if slug.is_empty() {
        format!("app-{}", &suffix[..8])
    } else {
        format!("{}-{}", slug, &suffix[..8])
    }
}

// ── Tests ─────────────────────────────────────────────────────────────
