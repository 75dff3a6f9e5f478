//! REST handlers for conversation management.
//!
//! Every error crossing this boundary is mapped to a status code plus a
//! JSON body carrying the human-readable message and the stable `kind`.

use crate::SharedState;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::{Deserialize, Serialize};
use tidechat_core::error::{Error, ValidationError};
use tidechat_core::message::{Conversation, ConversationId, FewShotExample};
use tidechat_core::store::ConversationSummary;
use tracing::warn;

/// Wire shape of every error response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub kind: String,
}

fn error_response(error: &Error) -> Response {
    let status = match error {
        Error::Validation(ValidationError::DuplicateFewShot { .. }) => StatusCode::CONFLICT,
        Error::Validation(_) => StatusCode::BAD_REQUEST,
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::Busy => StatusCode::CONFLICT,
        Error::Model(_) => StatusCode::BAD_GATEWAY,
        Error::Store(_) | Error::Serialization(_) | Error::Internal(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    if status.is_server_error() {
        warn!(kind = error.kind(), %error, "request failed");
    }
    let body = ErrorBody {
        error: error.to_string(),
        kind: error.kind().to_string(),
    };
    (status, Json(body)).into_response()
}

// --- Health and config ---

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub store: String,
}

/// `GET /health`
pub async fn health_handler(State(state): State<SharedState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        version: env!("CARGO_PKG_VERSION").into(),
        store: state.store.name().to_string(),
    })
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConfigResponse {
    pub model: String,
    pub max_context_tokens: usize,
    pub reply_tokens: usize,
    pub chunk_tokens: usize,
    pub max_upload_bytes: u64,
    pub allowed_extensions: Vec<String>,
    pub has_api_key: bool,
}

/// `GET /config` — the client-visible settings. Never includes the key.
pub async fn config_handler(State(state): State<SharedState>) -> Json<ConfigResponse> {
    let config = &state.config;
    Json(ConfigResponse {
        model: config.model.clone(),
        max_context_tokens: config.context.max_tokens,
        reply_tokens: config.context.reply_tokens,
        chunk_tokens: config.upload.chunk_tokens,
        max_upload_bytes: config.upload.max_bytes,
        allowed_extensions: config.upload.allowed_extensions.clone(),
        has_api_key: config.has_api_key(),
    })
}

// --- Conversation CRUD ---

/// `POST /conversations`
pub async fn create_conversation_handler(State(state): State<SharedState>) -> Response {
    match state.store.create().await {
        Ok(conversation) => (StatusCode::CREATED, Json(conversation)).into_response(),
        Err(e) => error_response(&e),
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConversationListResponse {
    pub conversations: Vec<ConversationSummary>,
    pub count: usize,
}

/// `GET /conversations` — summaries, newest first.
pub async fn list_conversations_handler(State(state): State<SharedState>) -> Response {
    match state.store.list().await {
        Ok(conversations) => {
            let count = conversations.len();
            Json(ConversationListResponse {
                conversations,
                count,
            })
            .into_response()
        }
        Err(e) => error_response(&e),
    }
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
}

/// `GET /conversations/search?q=...`
pub async fn search_handler(
    State(state): State<SharedState>,
    Query(query): Query<SearchQuery>,
) -> Response {
    match state.store.search(&query.q).await {
        Ok(conversations) => {
            let count = conversations.len();
            Json(ConversationListResponse {
                conversations,
                count,
            })
            .into_response()
        }
        Err(e) => error_response(&e),
    }
}

/// `GET /conversations/{id}`
pub async fn get_conversation_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Response {
    match state.store.get(&ConversationId(id)).await {
        Ok(conversation) => Json(conversation).into_response(),
        Err(e) => error_response(&e),
    }
}

/// `GET /conversations/{id}/export` — the full record as a JSON download.
pub async fn export_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Response {
    match state.store.get(&ConversationId(id)).await {
        Ok(conversation) => export_response(&conversation),
        Err(e) => error_response(&e),
    }
}

fn export_response(conversation: &Conversation) -> Response {
    let filename = format!("conversation-{}.json", conversation.id);
    let disposition = format!("attachment; filename=\"{filename}\"");
    (
        [(axum::http::header::CONTENT_DISPOSITION, disposition)],
        Json(conversation),
    )
        .into_response()
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ResetResponse {
    pub id: String,
    pub total_tokens: usize,
}

/// `POST /conversations/{id}/reset` — clear turns and examples, keep the id.
pub async fn reset_handler(State(state): State<SharedState>, Path(id): Path<String>) -> Response {
    let id = ConversationId(id);
    match state.store.reset(&id).await {
        Ok(()) => Json(ResetResponse {
            id: id.0,
            total_tokens: 0,
        })
        .into_response(),
        Err(e) => error_response(&e),
    }
}

// --- Few-shot examples ---

#[derive(Debug, Serialize, Deserialize)]
pub struct FewShotRequest {
    #[serde(default)]
    pub user_prompt: String,
    #[serde(default)]
    pub assistant_response: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FewShotResponse {
    pub total_tokens: usize,
}

/// `POST /conversations/{id}/few-shot`
pub async fn few_shot_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(request): Json<FewShotRequest>,
) -> Response {
    if request.user_prompt.trim().is_empty() || request.assistant_response.trim().is_empty() {
        return error_response(&ValidationError::EmptyFewShotField.into());
    }

    let example = FewShotExample {
        user_prompt: request.user_prompt,
        assistant_response: request.assistant_response,
    };
    match state
        .store
        .append_few_shot(&ConversationId(id), example)
        .await
    {
        Ok(total_tokens) => Json(FewShotResponse { total_tokens }).into_response(),
        Err(e) => error_response(&e),
    }
}

// --- File upload ---

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub filename: String,
    pub chunks: usize,
    pub analysis: String,
    pub total_tokens: usize,
}

/// `POST /conversations/{id}/upload` — multipart with a single `file` field.
pub async fn upload_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    mut multipart: Multipart,
) -> Response {
    let mut file: Option<(String, Vec<u8>)> = None;

    loop {
        match multipart.next_field().await {
            Ok(Some(field)) if field.name() == Some("file") => {
                let filename = field.file_name().unwrap_or("upload").to_string();
                match field.bytes().await {
                    Ok(bytes) => file = Some((filename, bytes.to_vec())),
                    Err(e) => {
                        return error_response(&Error::Internal(format!(
                            "failed to read upload: {e}"
                        )));
                    }
                }
            }
            Ok(Some(_)) => continue,
            Ok(None) => break,
            Err(e) => {
                return error_response(&Error::Internal(format!("malformed multipart body: {e}")));
            }
        }
    }

    let Some((filename, bytes)) = file else {
        return error_response(&Error::Internal("missing \"file\" field".into()));
    };

    match state
        .ingest
        .ingest(&ConversationId(id), &filename, &bytes)
        .await
    {
        Ok(report) => Json(UploadResponse {
            filename,
            chunks: report.chunks,
            analysis: report.analysis,
            total_tokens: report.total_tokens,
        })
        .into_response(),
        Err(e) => error_response(&e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{GatewayState, build_router};
    use axum::body::Body;
    use axum::http::{Request, header};
    use http_body_util::BodyExt;
    use std::sync::Arc;
    use tidechat_config::AppConfig;
    use tidechat_core::store::ConversationStore;
    use tidechat_provider::ScriptedClient;
    use tidechat_session::{IngestionPipeline, SessionConfig, SessionManager};
    use tidechat_store::InMemoryStore;
    use tower::ServiceExt;

    fn test_state() -> crate::SharedState {
        let mut config = AppConfig::default();
        config.store.backend = "memory".into();

        let store: Arc<dyn ConversationStore> = Arc::new(InMemoryStore::new());
        let model = Arc::new(ScriptedClient::repeating("chunk analysis", 16));

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

        Arc::new(GatewayState {
            store,
            sessions,
            ingest,
            config,
        })
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_returns_ok() {
        let app = build_router(test_state());
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["status"], "ok");
        assert_eq!(json["store"], "in_memory");
    }

    #[tokio::test]
    async fn config_exposes_limits_but_never_the_key() {
        let state = test_state();
        let app = build_router(state);
        let response = app
            .oneshot(Request::get("/config").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["max_context_tokens"], 128_000);
        assert_eq!(json["has_api_key"], false);
        assert!(json.get("api_key").is_none());
    }

    #[tokio::test]
    async fn create_conversation_returns_201() {
        let app = build_router(test_state());
        let response = app
            .oneshot(Request::post("/conversations").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::CREATED);
        let json = body_json(response).await;
        assert!(json["id"].as_str().is_some());
        assert_eq!(json["turns"].as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn unknown_conversation_is_404() {
        let app = build_router(test_state());
        let response = app
            .oneshot(
                Request::get("/conversations/no-such-id")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let json = body_json(response).await;
        assert_eq!(json["kind"], "not_found");
    }

    #[tokio::test]
    async fn list_shows_created_conversations() {
        let state = test_state();
        state.store.create().await.unwrap();
        state.store.create().await.unwrap();

        let app = build_router(state);
        let response = app
            .oneshot(Request::get("/conversations").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["count"], 2);
    }

    #[tokio::test]
    async fn duplicate_few_shot_is_409() {
        let state = test_state();
        let conv = state.store.create().await.unwrap();
        let app = build_router(state);

        let payload = r#"{"user_prompt":"Q","assistant_response":"A"}"#;
        let request = |body: &str| {
            Request::post(format!("/conversations/{}/few-shot", conv.id))
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap()
        };

        let response = app.clone().oneshot(request(payload)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert!(json["total_tokens"].as_u64().unwrap() > 0);

        let response = app.oneshot(request(payload)).await.unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let json = body_json(response).await;
        assert_eq!(json["kind"], "validation_error");
    }

    #[tokio::test]
    async fn empty_few_shot_field_is_400() {
        let state = test_state();
        let conv = state.store.create().await.unwrap();
        let app = build_router(state);

        let response = app
            .oneshot(
                Request::post(format!("/conversations/{}/few-shot", conv.id))
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"user_prompt":"Q","assistant_response":"  "}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn reset_clears_and_returns_zero_total() {
        let state = test_state();
        let conv = state.store.create().await.unwrap();
        state
            .store
            .append_turn(&conv.id, tidechat_core::message::Turn::user("hello"))
            .await
            .unwrap();

        let app = build_router(state.clone());
        let response = app
            .oneshot(
                Request::post(format!("/conversations/{}/reset", conv.id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["total_tokens"], 0);
        assert!(state.store.get(&conv.id).await.unwrap().turns.is_empty());
    }

    #[tokio::test]
    async fn search_finds_matching_conversations() {
        let state = test_state();
        let conv = state.store.create().await.unwrap();
        state
            .store
            .append_turn(
                &conv.id,
                tidechat_core::message::Turn::user("tell me about lighthouses"),
            )
            .await
            .unwrap();

        let app = build_router(state);
        let response = app
            .oneshot(
                Request::get("/conversations/search?q=lighthouses")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["count"], 1);
    }

    #[tokio::test]
    async fn export_sets_download_headers() {
        let state = test_state();
        let conv = state.store.create().await.unwrap();

        let app = build_router(state);
        let response = app
            .oneshot(
                Request::get(format!("/conversations/{}/export", conv.id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let disposition = response
            .headers()
            .get(header::CONTENT_DISPOSITION)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert!(disposition.contains("attachment"));
        assert!(disposition.contains(&conv.id.0));

        let json = body_json(response).await;
        assert_eq!(json["id"], conv.id.0);
    }

    fn multipart_body(boundary: &str, filename: &str, content: &[u8]) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
        body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(content);
        body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
        body
    }

    #[tokio::test]
    async fn upload_analyzes_and_persists() {
        let state = test_state();
        let conv = state.store.create().await.unwrap();
        let app = build_router(state.clone());

        let boundary = "test-boundary";
        let body = multipart_body(boundary, "notes.txt", b"some notes to analyze\n");
        let response = app
            .oneshot(
                Request::post(format!("/conversations/{}/upload", conv.id))
                    .header(
                        header::CONTENT_TYPE,
                        format!("multipart/form-data; boundary={boundary}"),
                    )
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["chunks"], 1);
        assert!(json["analysis"].as_str().unwrap().contains("chunk analysis"));

        let stored = state.store.get(&conv.id).await.unwrap();
        assert_eq!(stored.turns.len(), 2);
    }

    #[tokio::test]
    async fn upload_rejects_unsupported_extension() {
        let state = test_state();
        let conv = state.store.create().await.unwrap();
        let app = build_router(state);

        let boundary = "test-boundary";
        let body = multipart_body(boundary, "payload.exe", b"MZ");
        let response = app
            .oneshot(
                Request::post(format!("/conversations/{}/upload", conv.id))
                    .header(
                        header::CONTENT_TYPE,
                        format!("multipart/form-data; boundary={boundary}"),
                    )
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["kind"], "validation_error");
    }
}
