//! VoxVault HTTP API Service
//!
//! Entry point for the VoxVault API server: voice-recording upload,
//! transcription and cleanup pipelines, provider discovery, and
//! envelope-encryption operations (erasure, rotation, status).

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod auth;
mod config;
mod handlers;
mod state;

use config::ApiConfig;
use state::AppState;

fn create_router(state: AppState) -> Router {
    let body_limit = state.config.max_upload_bytes + 1024 * 1024;
    Router::new()
        .route("/health", get(handlers::health::health))
        .route("/api/v1/upload", post(handlers::upload::upload))
        .route(
            "/api/v1/entries/:id/transcribe",
            post(handlers::entries::transcribe),
        )
        .route(
            "/api/v1/entries/:id/cleanup",
            post(handlers::entries::cleanup),
        )
        .route(
            "/api/v1/transcriptions/:id",
            get(handlers::transcriptions::get_transcription),
        )
        .route(
            "/api/v1/transcriptions/:id/promote",
            post(handlers::transcriptions::promote_transcription),
        )
        .route(
            "/api/v1/cleaned-entries/:id",
            get(handlers::cleaned_entries::get_cleaned_entry)
                .patch(handlers::cleaned_entries::edit_cleaned_entry),
        )
        .route("/api/v1/options", get(handlers::models::options))
        .route(
            "/api/v1/models/transcription",
            get(handlers::models::transcription_models),
        )
        .route("/api/v1/models/llm", get(handlers::models::llm_models))
        .route(
            "/api/v1/models/languages",
            get(handlers::models::supported_languages),
        )
        .route("/api/v1/encryption/erase", post(handlers::encryption::erase))
        .route(
            "/api/v1/encryption/rotate",
            post(handlers::encryption::rotate),
        )
        .route(
            "/api/v1/encryption/status/:id",
            get(handlers::encryption::status),
        )
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[tokio::main]
async fn main() {
    let config = ApiConfig::from_env();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(format!(
                    "vv_api={0},tower_http={0}",
                    config.log_level
                ))
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let bind_addr = format!("{}:{}", config.host, config.port);
    let state = match AppState::build(config) {
        Ok(state) => state,
        Err(e) => {
            tracing::error!(error = %e, "Failed to build application state");
            std::process::exit(1);
        }
    };

    state.spawn_workers();
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .expect("Failed to bind listener");

    tracing::info!("VoxVault API listening on http://{bind_addr}");

    axum::serve(listener, app).await.expect("Failed to start server");
}
