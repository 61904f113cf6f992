use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use utoipa::{OpenApi, ToSchema};

use research_chat_error::{ChatError, ProblemDetails};

use crate::lifecycle::ChatRuntime;
use crate::sessions::Session;
use crate::sse;
use crate::store::{ChatMessage, ChatRole};

const MAX_CONTENT_CHARS: usize = 10_000;

#[derive(Clone)]
pub struct AppState {
    pub runtime: Arc<ChatRuntime>,
}

/// Error wrapper that renders as an RFC 7807 problem document.
#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct ApiError(#[from] ChatError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let problem = self.0.to_problem_details();
        let status = StatusCode::from_u16(problem.status)
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(problem)).into_response()
    }
}

#[derive(Debug, Serialize, JsonSchema, ToSchema)]
pub struct HealthResponse {
    pub status: String,
}

#[derive(Debug, Deserialize, JsonSchema, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    pub workspace_path: String,
    #[serde(default)]
    pub indexed: bool,
}

#[derive(Debug, Serialize, JsonSchema, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub session_id: String,
    pub workspace_path: String,
    pub indexed: bool,
}

#[derive(Debug, Deserialize, JsonSchema, ToSchema)]
pub struct SendChatMessageRequest {
    pub content: String,
}

/// The accepted user message plus the stream URL the client should follow.
#[derive(Debug, Serialize, JsonSchema, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SendChatMessageResponse {
    #[serde(flatten)]
    pub message: ChatMessage,
    pub assistant_message_id: String,
    pub stream_url: String,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    50
}

#[derive(Debug, Serialize, JsonSchema, ToSchema)]
pub struct ChatMessageListResponse {
    pub messages: Vec<ChatMessage>,
    pub count: usize,
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health,
        create_session,
        send_chat_message,
        list_chat_messages,
        get_chat_message,
        delete_chat_message,
        clear_chat,
    ),
    components(schemas(
        HealthResponse,
        CreateSessionRequest,
        SessionResponse,
        SendChatMessageRequest,
        SendChatMessageResponse,
        ChatMessageListResponse,
        ChatMessage,
        ProblemDetails,
    ))
)]
pub struct ApiDoc;

pub fn build_router(runtime: Arc<ChatRuntime>) -> Router {
    let state = AppState { runtime };
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/openapi.json", get(openapi_spec))
        .route("/v1/sessions/:session_id", post(create_session))
        .route(
            "/v1/sessions/:session_id/chat",
            post(send_chat_message)
                .get(list_chat_messages)
                .delete(clear_chat),
        )
        .route(
            "/v1/sessions/:session_id/chat/stream/:message_id",
            get(stream_chat_response),
        )
        .route(
            "/v1/sessions/:session_id/chat/:message_id",
            get(get_chat_message).delete(delete_chat_message),
        )
        .with_state(state)
}

#[utoipa::path(
    get,
    path = "/v1/health",
    responses((status = 200, body = HealthResponse))
)]
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

async fn openapi_spec() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

#[utoipa::path(
    post,
    path = "/v1/sessions/{session_id}",
    params(("session_id" = String, Path,)),
    request_body = CreateSessionRequest,
    responses(
        (status = 201, body = SessionResponse),
        (status = 400, body = ProblemDetails),
    )
)]
async fn create_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(request): Json<CreateSessionRequest>,
) -> Result<(StatusCode, Json<SessionResponse>), ApiError> {
    if request.workspace_path.is_empty() {
        return Err(ChatError::InvalidRequest {
            message: "workspacePath must not be empty".to_string(),
        }
        .into());
    }
    let session = Session {
        session_id: session_id.clone(),
        workspace_path: request.workspace_path.clone().into(),
        indexed: request.indexed,
    };
    state.runtime.sessions().upsert(session).await;
    tracing::info!(session_id, indexed = request.indexed, "session registered");
    Ok((
        StatusCode::CREATED,
        Json(SessionResponse {
            session_id,
            workspace_path: request.workspace_path,
            indexed: request.indexed,
        }),
    ))
}

#[utoipa::path(
    post,
    path = "/v1/sessions/{session_id}/chat",
    params(("session_id" = String, Path,)),
    request_body = SendChatMessageRequest,
    responses(
        (status = 201, body = SendChatMessageResponse),
        (status = 400, body = ProblemDetails),
        (status = 404, body = ProblemDetails),
    )
)]
async fn send_chat_message(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(request): Json<SendChatMessageRequest>,
) -> Result<(StatusCode, Json<SendChatMessageResponse>), ApiError> {
    let session = state
        .runtime
        .sessions()
        .get(&session_id)
        .await
        .ok_or_else(|| ChatError::SessionNotFound {
            session_id: session_id.clone(),
        })?;
    if !session.indexed {
        return Err(ChatError::SessionNotIndexed { session_id }.into());
    }
    if request.content.trim().is_empty() {
        return Err(ChatError::InvalidRequest {
            message: "content must not be empty".to_string(),
        }
        .into());
    }
    if request.content.chars().count() > MAX_CONTENT_CHARS {
        return Err(ChatError::InvalidRequest {
            message: format!("content exceeds {MAX_CONTENT_CHARS} characters"),
        }
        .into());
    }

    let store = state.runtime.store();
    let user = store
        .create(&session_id, ChatRole::User, &request.content)
        .await;
    let assistant = store.create(&session_id, ChatRole::Assistant, "").await;
    let stream_url = format!(
        "/v1/sessions/{session_id}/chat/stream/{}",
        assistant.message_id
    );
    tracing::info!(
        session_id,
        user_message_id = %user.message_id,
        assistant_message_id = %assistant.message_id,
        "chat message accepted"
    );
    Ok((
        StatusCode::CREATED,
        Json(SendChatMessageResponse {
            message: user,
            assistant_message_id: assistant.message_id,
            stream_url,
        }),
    ))
}

/// SSE stream of one agent run. The URL is single-use: once the assistant
/// message reaches a terminal status the route answers 410.
async fn stream_chat_response(
    State(state): State<AppState>,
    Path((session_id, message_id)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let receiver = state.runtime.start_run(&session_id, &message_id).await?;
    Ok(sse::stream_response(receiver))
}

#[utoipa::path(
    get,
    path = "/v1/sessions/{session_id}/chat",
    params(
        ("session_id" = String, Path,),
        ("limit" = Option<usize>, Query,),
        ("offset" = Option<usize>, Query,),
    ),
    responses(
        (status = 200, body = ChatMessageListResponse),
        (status = 404, body = ProblemDetails),
    )
)]
async fn list_chat_messages(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ChatMessageListResponse>, ApiError> {
    ensure_session_exists(&state, &session_id).await?;
    let (messages, count) = state
        .runtime
        .store()
        .list(&session_id, query.limit, query.offset)
        .await;
    Ok(Json(ChatMessageListResponse { messages, count }))
}

#[utoipa::path(
    get,
    path = "/v1/sessions/{session_id}/chat/{message_id}",
    params(("session_id" = String, Path,), ("message_id" = String, Path,)),
    responses(
        (status = 200, body = ChatMessage),
        (status = 404, body = ProblemDetails),
    )
)]
async fn get_chat_message(
    State(state): State<AppState>,
    Path((session_id, message_id)): Path<(String, String)>,
) -> Result<Json<ChatMessage>, ApiError> {
    ensure_session_exists(&state, &session_id).await?;
    let message = state
        .runtime
        .store()
        .get(&session_id, &message_id)
        .await
        .ok_or(ChatError::MessageNotFound { message_id })?;
    Ok(Json(message))
}

#[utoipa::path(
    delete,
    path = "/v1/sessions/{session_id}/chat/{message_id}",
    params(("session_id" = String, Path,), ("message_id" = String, Path,)),
    responses(
        (status = 204),
        (status = 404, body = ProblemDetails),
    )
)]
async fn delete_chat_message(
    State(state): State<AppState>,
    Path((session_id, message_id)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    ensure_session_exists(&state, &session_id).await?;
    if !state.runtime.store().delete(&session_id, &message_id).await {
        return Err(ChatError::MessageNotFound { message_id }.into());
    }
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    delete,
    path = "/v1/sessions/{session_id}/chat",
    params(("session_id" = String, Path,)),
    responses(
        (status = 204),
        (status = 404, body = ProblemDetails),
    )
)]
async fn clear_chat(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    ensure_session_exists(&state, &session_id).await?;
    let removed = state.runtime.store().clear(&session_id).await;
    tracing::info!(session_id, removed, "chat history cleared");
    Ok(StatusCode::NO_CONTENT)
}

async fn ensure_session_exists(state: &AppState, session_id: &str) -> Result<(), ApiError> {
    state
        .runtime
        .sessions()
        .get(session_id)
        .await
        .map(|_| ())
        .ok_or_else(|| {
            ApiError::from(ChatError::SessionNotFound {
                session_id: session_id.to_string(),
            })
        })
}
