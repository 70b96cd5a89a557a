use crate::agent::ChatAgent;
use crate::history::HistoryError;
use crate::models::api::{
    ChatRequest,
    ChatResponse,
    CreateSessionRequest,
    DeleteResponse,
    ErrorResponse,
    RenameSessionRequest,
};
use crate::models::chat::{ Message, Session };
use std::sync::Arc;
use axum::{
    routing::{ get, post },
    Json,
    Router,
    extract::{ rejection::JsonRejection, Path, State },
    response::{ IntoResponse, Response },
    http::{ header, HeaderValue, Method, StatusCode },
};
use tower_http::cors::{ AllowOrigin, CorsLayer };
use uuid::Uuid;
use log::{ info, error, warn };

pub const BANNER: &str = "Chatbot API is live";

#[derive(Clone)]
pub struct AppState {
    pub agent: Arc<ChatAgent>,
}

/// Failures surfaced to HTTP clients. Only the static message is sent; the
/// cause is logged where the error is produced.
#[derive(Debug, PartialEq, Eq)]
pub enum ApiError {
    BadRequest(&'static str),
    NotFound(&'static str),
    Conflict(&'static str),
    Internal(&'static str),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m),
            ApiError::Conflict(m) => (StatusCode::CONFLICT, m),
            ApiError::Internal(m) => (StatusCode::INTERNAL_SERVER_ERROR, m),
        };
        (status, Json(ErrorResponse { error: message.to_string() })).into_response()
    }
}

fn history_failure(context: &str, err: HistoryError, internal: &'static str) -> ApiError {
    match err {
        HistoryError::NotFound(id) => {
            warn!("{}: session {} not found", context, id);
            ApiError::NotFound("Session not found.")
        }
        HistoryError::AlreadyExists(id) => {
            warn!("{}: session {} already exists", context, id);
            ApiError::Conflict("Session already exists.")
        }
        other => {
            error!("{}: {}", context, other);
            ApiError::Internal(internal)
        }
    }
}

/// Unreadable bodies (wrong content type, bad JSON, mistyped fields) get the
/// route's own validation message instead of axum's rejection text.
fn json_body<T>(
    body: Result<Json<T>, JsonRejection>,
    context: &str,
    message: &'static str
) -> Result<T, ApiError> {
    match body {
        Ok(Json(value)) => Ok(value),
        Err(rejection) => {
            warn!("{}: rejected request body: {}", context, rejection.body_text());
            Err(ApiError::BadRequest(message))
        }
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

pub fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE])
        .allow_credentials(true)
}

pub fn router(state: AppState, origins: &[String]) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/chat", post(chat_handler))
        .route("/history", post(create_session_handler))
        .route("/history/sessions", get(list_sessions_handler))
        .route(
            "/history/{session_id}",
            get(get_messages_handler).patch(rename_session_handler).delete(delete_session_handler)
        )
        .layer(cors_layer(origins))
        .with_state(state)
}

async fn root_handler() -> &'static str {
    BANNER
}

async fn chat_handler(
    State(state): State<AppState>,
    body: Result<Json<ChatRequest>, JsonRejection>
) -> Result<Json<ChatResponse>, ApiError> {
    let req = json_body(body, "Chat request", "Missing message or sessionId")?;
    let (Some(message), Some(session_id)) = (non_blank(req.message), non_blank(req.session_id)) else {
        return Err(ApiError::BadRequest("Missing message or sessionId"));
    };

    match state.agent.get_response(&message, &session_id).await {
        Ok(reply) => Ok(Json(ChatResponse { reply })),
        Err(e) => {
            error!("Error in /chat for session {}: {}", session_id, e);
            Err(ApiError::Internal("Internal server error"))
        }
    }
}

async fn list_sessions_handler(State(state): State<AppState>) -> Result<
    Json<Vec<Session>>,
    ApiError
> {
    let sessions = state.agent
        .history_store()
        .list_sessions().await
        .map_err(|e| history_failure("Fetching sessions", e, "Failed to fetch sessions."))?;
    Ok(Json(sessions))
}

async fn get_messages_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>
) -> Result<Json<Vec<Message>>, ApiError> {
    let messages = state.agent
        .history_store()
        .get_messages(&session_id).await
        .map_err(|e| history_failure("Fetching messages", e, "Failed to fetch messages."))?;
    Ok(Json(messages))
}

async fn create_session_handler(
    State(state): State<AppState>,
    body: Result<Json<CreateSessionRequest>, JsonRejection>
) -> Result<(StatusCode, Json<Session>), ApiError> {
    let req = json_body(body, "Creating session", "Missing id or name")?;
    let Some(name) = non_blank(req.name) else {
        return Err(ApiError::BadRequest("Missing id or name"));
    };
    let id = match req.id {
        Some(id) if id.trim().is_empty() => {
            return Err(ApiError::BadRequest("Missing id or name"));
        }
        Some(id) => id,
        None => Uuid::new_v4().to_string(),
    };

    let session = state.agent
        .history_store()
        .create_session(&id, name.trim()).await
        .map_err(|e| history_failure("Creating session", e, "Failed to create session"))?;
    info!("Created session {} ({})", session.id, session.name);
    Ok((StatusCode::CREATED, Json(session)))
}

async fn rename_session_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    body: Result<Json<RenameSessionRequest>, JsonRejection>
) -> Result<Json<Session>, ApiError> {
    let req = json_body(body, "Renaming session", "Session name required.")?;
    let Some(name) = non_blank(req.name) else {
        return Err(ApiError::BadRequest("Session name required."));
    };
    let session = state.agent
        .history_store()
        .rename_session(&session_id, name.trim()).await
        .map_err(|e| history_failure("Renaming session", e, "Failed to rename session."))?;
    Ok(Json(session))
}

async fn delete_session_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>
) -> Result<Json<DeleteResponse>, ApiError> {
    state.agent
        .history_store()
        .delete_session(&session_id).await
        .map_err(|e| history_failure("Deleting session", e, "Failed to delete session."))?;
    state.agent.forget(&session_id).await;
    info!(
        "Deleted session {} ({} conversations held in memory)",
        session_id,
        state.agent.active_memories().await
    );
    Ok(Json(DeleteResponse { success: true }))
}
