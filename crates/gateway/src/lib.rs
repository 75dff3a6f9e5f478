//! HTTP + WebSocket gateway for Tidechat.
//!
//! REST endpoints manage conversations (create, list, search, export, reset,
//! few-shot examples, file upload); the WebSocket endpoint carries the
//! streaming chat session itself.
//!
//! Built on Axum.

pub mod api;
pub mod ws;

use axum::extract::DefaultBodyLimit;
use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use tidechat_config::AppConfig;
use tidechat_core::store::ConversationStore;
use tidechat_session::{IngestionPipeline, SessionConfig, SessionManager};
use tracing::info;

/// Shared application state for the gateway.
pub struct GatewayState {
    pub store: Arc<dyn ConversationStore>,
    pub sessions: Arc<SessionManager>,
    pub ingest: Arc<IngestionPipeline>,
    pub config: AppConfig,
}

pub type SharedState = Arc<GatewayState>;

/// Build the Axum router with all gateway routes.
pub fn build_router(state: SharedState) -> Router {
    // The upload limit is enforced by the ingestion pipeline (a clean 400);
    // the body limit above it just stops abusive payloads.
    let body_limit = (state.config.upload.max_bytes as usize) + 1024 * 1024;

    let cors = tower_http::cors::CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
        .allow_headers([axum::http::header::CONTENT_TYPE]);

    Router::new()
        .route("/health", get(api::health_handler))
        .route("/config", get(api::config_handler))
        .route("/conversations", post(api::create_conversation_handler))
        .route("/conversations", get(api::list_conversations_handler))
        .route("/conversations/search", get(api::search_handler))
        .route("/conversations/{id}", get(api::get_conversation_handler))
        .route("/conversations/{id}/export", get(api::export_handler))
        .route("/conversations/{id}/reset", post(api::reset_handler))
        .route("/conversations/{id}/few-shot", post(api::few_shot_handler))
        .route("/conversations/{id}/upload", post(api::upload_handler))
        .route("/ws", get(ws::ws_handler))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

/// Build the shared state from configuration.
pub async fn build_state(config: AppConfig) -> Result<SharedState, Box<dyn std::error::Error>> {
    let store: Arc<dyn ConversationStore> = match config.store.backend.as_str() {
        "memory" => Arc::new(tidechat_store::InMemoryStore::new()),
        _ => {
            let path = config
                .store
                .path
                .clone()
                .unwrap_or_else(|| AppConfig::default_db_path().display().to_string());
            Arc::new(tidechat_store::SqliteStore::new(&path).await?)
        }
    };

    let model = tidechat_provider::build_from_config(&config)?;

    let sessions = Arc::new(SessionManager::new(
        store.clone(),
        model.clone(),
        SessionConfig::from_app(&config),
    ));

    let ingest = Arc::new(IngestionPipeline::new(
        model,
        store.clone(),
        config.upload.clone(),
        config.context.reply_tokens,
        config.temperature,
    ));

    Ok(Arc::new(GatewayState {
        store,
        sessions,
        ingest,
        config,
    }))
}

/// Start the gateway HTTP server.
pub async fn start(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);
    let state = build_state(config).await?;
    let app = build_router(state);

    info!(addr = %addr, "Gateway starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
