//! HTTP server assembly.

use std::sync::Arc;

use axum::{extract::State, response::Json, routing::get, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::extraction::LlmExtractionClient;
use crate::ingest::SpreadsheetIngestor;
use crate::llm::GeminiClient;
use crate::session::{Session, SessionConfig};

use super::session as session_api;
use super::types::HealthResponse;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    /// The single work-plan session of this process
    pub session: Arc<Session>,
}

impl AppState {
    /// Wire the production collaborators from configuration.
    pub fn from_config(config: Config) -> Self {
        if !config.has_api_key() {
            tracing::warn!("GEMINI_API_KEY is not set; uploads will fail at the analysis step");
        }

        let llm = Arc::new(
            GeminiClient::new(config.api_key.clone())
                .with_base_url(config.gemini_base_url.clone())
                .with_timeout(config.llm_timeout),
        );
        let extractor = Arc::new(LlmExtractionClient::new(llm, config.model.clone()));
        let session = Arc::new(Session::new(
            Arc::new(SpreadsheetIngestor::new()),
            extractor,
            SessionConfig {
                max_rows: config.max_analyzed_rows,
                reference_date: None,
            },
        ));

        Self { config, session }
    }
}

/// Build the application router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .nest(
            "/api/session",
            session_api::routes(state.config.max_upload_bytes),
        )
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let state = Arc::new(AppState::from_config(config));
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

/// Resolve on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        model: state.config.model.clone(),
        api_key_configured: state.config.has_api_key(),
    })
}
