//! HTTP server assembly: wires settings, store, backends, and gateways into
//! a running axum service with graceful shutdown.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::api::{AppState, api_router};
use crate::backend::{GitHubPagesBackend, LlmCodegenBackend, WebhookNotifier};
use crate::gateway::{GenerationGateway, NotificationGateway, PublicationGateway};
use crate::orchestrator::RoundOrchestrator;
use crate::settings::Settings;
use crate::store::{DbHandle, Store};

pub struct ServerConfig {
    pub db_path: PathBuf,
    pub settings: Settings,
}

/// Build the full application router.
pub fn build_router(state: Arc<AppState>) -> Router {
    api_router().layer(CorsLayer::permissive()).with_state(state)
}

/// Construct the orchestrator from settings, backed by the store at `db_path`.
pub fn build_orchestrator(db_path: &std::path::Path, settings: &Settings) -> Result<RoundOrchestrator> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).context("Failed to create database directory")?;
        }
    }
    let db = DbHandle::new(Store::new(db_path).context("Failed to initialize store")?);

    let generation = GenerationGateway::new(
        Arc::new(LlmCodegenBackend::new(
            &settings.llm_api_url,
            &settings.llm_api_key,
            &settings.llm_model,
        )),
        settings.generation_policy(),
    );
    let publication = PublicationGateway::new(
        Arc::new(GitHubPagesBackend::new(
            &settings.github_token,
            &settings.github_owner,
        )),
        settings.publication_policy(),
    );
    let notification = NotificationGateway::new(
        Arc::new(WebhookNotifier::new(&settings.evaluation_url)),
        settings.notification_policy(),
    );

    Ok(RoundOrchestrator::new(db, generation, publication, notification))
}

/// Start the server and block until shutdown.
pub async fn start_server(config: ServerConfig) -> Result<()> {
    let orchestrator = build_orchestrator(&config.db_path, &config.settings)?;
    let state = Arc::new(AppState {
        orchestrator: Arc::new(orchestrator),
        app_secret: config.settings.app_secret.clone(),
    });
    let app = build_router(state);

    let addr = format!("{}:{}", config.settings.host, config.settings.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    tracing::info!(addr = %listener.local_addr()?, "server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => tracing::error!("failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_router_builds_from_settings() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::from_lookup(|key| {
            match key {
                "APP_SECRET" => Some("s3cret"),
                "GITHUB_TOKEN" => Some("ghp_test"),
                "GITHUB_OWNER" => Some("octocat"),
                "LLM_API_KEY" => Some("key"),
                "EVALUATION_URL" => Some("https://example.com/evaluate"),
                _ => None,
            }
            .map(|s| s.to_string())
        })
        .unwrap();

        let orchestrator = build_orchestrator(&dir.path().join("rounds.db"), &settings).unwrap();
        let state = Arc::new(AppState {
            orchestrator: Arc::new(orchestrator),
            app_secret: settings.app_secret.clone(),
        });
        let app = build_router(state);

        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
