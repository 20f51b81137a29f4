use crate::agent::Assistant;
use crate::models::chat::ChatMessage;
use crate::server::ConversationLocks;
use std::error::Error;
use std::net::SocketAddr;
use std::sync::Arc;
use axum::{
    routing::{ delete, get, post },
    Router,
    Json,
    extract::{ Path, State },
    response::{ IntoResponse, Response },
    http::{ HeaderMap, StatusCode },
};
use serde::{ Deserialize, Serialize };
use tower_http::cors::{ Any, CorsLayer };
use log::{ info, error };

#[derive(Deserialize)]
pub struct SendMessageRequest {
    pub content: String,
}

#[derive(Serialize)]
struct MessageResponse {
    conversation_id: String,
    response: String,
}

#[derive(Serialize)]
struct ContextResponse {
    conversation_id: String,
    messages: Vec<ChatMessage>,
}

#[derive(Serialize)]
struct ModelsResponse {
    models: Vec<String>,
}

#[derive(Serialize)]
struct StatusResponse {
    success: bool,
    message: String,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Clone)]
struct AppState {
    assistant: Arc<Assistant>,
    locks: ConversationLocks,
    api_key: Option<String>,
}

fn error_response(status: StatusCode, error: impl ToString) -> Response {
    (status, Json(ErrorBody { error: error.to_string() })).into_response()
}

fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), Response> {
    check_api_key(state.api_key.as_deref(), headers)
}

fn check_api_key(required: Option<&str>, headers: &HeaderMap) -> Result<(), Response> {
    let Some(secret) = required else {
        return Ok(());
    };
    let provided = headers.get("x-api-key").and_then(|v| v.to_str().ok());
    if provided == Some(secret) {
        Ok(())
    } else {
        Err(error_response(StatusCode::UNAUTHORIZED, "invalid or missing api key"))
    }
}

fn router(state: AppState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route("/api/conversations/{id}/messages", post(send_message_handler))
        .route("/api/conversations/{id}/context", get(context_handler))
        .route("/api/conversations/{id}", delete(clear_handler))
        .route("/api/models", get(models_handler))
        .route("/api/reload-prompts", get(reload_prompts_handler))
        .layer(cors)
        .with_state(state)
}

pub async fn start_http_server(
    http_port: u16,
    assistant: Arc<Assistant>,
    locks: ConversationLocks,
    api_key: Option<String>
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let addr = format!("0.0.0.0:{}", http_port).parse::<SocketAddr>()?;
    info!("Starting HTTP API server on: http://{}", addr);

    let app = router(AppState { assistant, locks, api_key });

    tokio::spawn(async move {
        match tokio::net::TcpListener::bind(addr).await {
            Ok(listener) => {
                if let Err(e) = axum::serve(listener, app.into_make_service()).await {
                    error!("HTTP server error: {}", e);
                }
            }
            Err(e) => {
                error!("Failed to bind HTTP server to {}: {}. Try a different port.", addr, e);
            }
        }
    });

    info!("HTTP server started");
    Ok(())
}

async fn send_message_handler(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<SendMessageRequest>
) -> Response {
    if let Err(res) = authorize(&state, &headers) {
        return res;
    }
    let _turn = state.locks.acquire(&conversation_id).await;
    match state.assistant.process_message(&conversation_id, &req.content).await {
        Ok(response) => Json(MessageResponse { conversation_id, response }).into_response(),
        Err(e) => {
            error!("Agent error for conversation {}: {}", conversation_id, e);
            error_response(StatusCode::BAD_GATEWAY, e)
        }
    }
}

async fn context_handler(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
    headers: HeaderMap
) -> Response {
    if let Err(res) = authorize(&state, &headers) {
        return res;
    }
    match state.assistant.context_messages(&conversation_id).await {
        Ok(messages) => Json(ContextResponse { conversation_id, messages }).into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

async fn clear_handler(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
    headers: HeaderMap
) -> Response {
    if let Err(res) = authorize(&state, &headers) {
        return res;
    }
    let _turn = state.locks.acquire(&conversation_id).await;
    match state.assistant.clear_history(&conversation_id).await {
        Ok(()) =>
            Json(StatusResponse {
                success: true,
                message: "Conversation has been cleared!".into(),
            }).into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

async fn models_handler(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(res) = authorize(&state, &headers) {
        return res;
    }
    match state.assistant.list_models().await {
        Ok(models) => Json(ModelsResponse { models }).into_response(),
        Err(e) => error_response(StatusCode::BAD_GATEWAY, e),
    }
}

async fn reload_prompts_handler(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(res) = authorize(&state, &headers) {
        return res;
    }
    let (code, success, message) = match state.assistant.reload_prompts_if_changed().await {
        Ok(true) => (StatusCode::OK, true, "Prompts reloaded".to_string()),
        Ok(false) => (StatusCode::OK, true, "Prompts unchanged".to_string()),
        Err(e) => (StatusCode::BAD_REQUEST, false, format!("Reload error: {}", e)),
    };
    (code, Json(StatusResponse { success, message })).into_response()
}
