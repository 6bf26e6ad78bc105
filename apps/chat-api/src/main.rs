use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_stream::stream;
use axum::body::Body;
use axum::extract::{DefaultBodyLimit, Multipart, Path, Query, State};
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::Html;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chat_protocol::{
    ChatError, DEFAULT_SESSION_TITLE, FileId, MessageRecord, NewFile, SessionId, SessionRecord,
    SessionStore,
};
use chat_runtime::{ChatRequest, ChatRuntime, RuntimeBuilder};
use chrono::{DateTime, Utc};
use clap::Parser;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

mod openapi;
mod upload;

use crate::openapi::{openapi_spec, scalar_docs_html};
use crate::upload::{DEFAULT_FILENAME, UploadPolicy};

const SESSION_LIST_LIMIT: usize = 50;
/// Multipart framing allowance on top of the file size limit.
const UPLOAD_OVERHEAD_BYTES: usize = 64 * 1024;

#[derive(Debug, Parser)]
#[command(name = "chat-api")]
#[command(about = "Streaming chat API")]
struct Cli {
    #[arg(long, env = "CHAT_ROOT", default_value = ".chat")]
    root: PathBuf,
    #[arg(long, env = "CHAT_LISTEN", default_value = "127.0.0.1:8000")]
    listen: SocketAddr,
    /// Allowed CORS origin; repeat or comma separate. `*` allows any origin.
    #[arg(
        long = "cors-origin",
        env = "CHAT_CORS_ORIGINS",
        value_delimiter = ',',
        default_value = "http://localhost:3000"
    )]
    cors_origins: Vec<String>,
    #[arg(long, env = "CHAT_MAX_FILE_SIZE_MB", default_value_t = 10)]
    max_file_size_mb: usize,
    #[arg(
        long = "allowed-file-type",
        env = "CHAT_ALLOWED_FILE_TYPES",
        value_delimiter = ',',
        default_value = "image/png,image/jpeg,image/jpg"
    )]
    allowed_file_types: Vec<String>,
    #[arg(long, env = "CHAT_HISTORY_LIMIT", default_value_t = 20)]
    history_limit: usize,
}

#[derive(Clone)]
struct AppState {
    runtime: ChatRuntime,
    uploads: Arc<UploadPolicy>,
}

impl AppState {
    fn new(runtime: ChatRuntime, uploads: UploadPolicy) -> Self {
        Self {
            runtime,
            uploads: Arc::new(uploads),
        }
    }

    fn store(&self) -> &Arc<dyn SessionStore> {
        self.runtime.store()
    }
}

#[derive(Debug, Deserialize, Default)]
struct CreateSessionRequest {
    title: Option<String>,
}

#[derive(Debug, Serialize)]
struct SessionResponse {
    session_id: SessionId,
    title: String,
    created_at: DateTime<Utc>,
    last_activity_at: DateTime<Utc>,
    message_count: usize,
}

#[derive(Debug, Deserialize, Default)]
struct MessageListQuery {
    limit: Option<usize>,
}

#[derive(Debug, Serialize)]
struct FileUploadResponse {
    file_id: FileId,
    filename: String,
    file_type: String,
    file_size: u64,
    uploaded_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct ChatBody {
    session_id: String,
    content: String,
    file_ids: Option<Vec<String>>,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    fn internal(error: impl std::fmt::Display) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: error.to_string(),
        }
    }
}

impl From<ChatError> for ApiError {
    fn from(error: ChatError) -> Self {
        if error.is_not_found() {
            Self::not_found(error.to_string())
        } else if matches!(error, ChatError::InvalidUpload(_)) {
            Self::bad_request(error.to_string())
        } else {
            tracing::error!(%error, "request failed");
            Self::internal(error)
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .json()
        .init();

    let cli = Cli::parse();
    let runtime = RuntimeBuilder::new(&cli.root)
        .history_limit(cli.history_limit)
        .build();
    let uploads = UploadPolicy::new(cli.max_file_size_mb, cli.allowed_file_types);
    let cors = cors_layer(&cli.cors_origins)?;

    let app = router(AppState::new(runtime, uploads))
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(cli.listen)
        .await
        .with_context(|| format!("failed to bind {}", cli.listen))?;
    info!(
        listen = %cli.listen,
        root = %cli.root.display(),
        cors_origins = ?cli.cors_origins,
        "chat-api listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

fn router(state: AppState) -> Router {
    let upload_limit = state.uploads.max_bytes.saturating_add(UPLOAD_OVERHEAD_BYTES);
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/openapi.json", get(openapi_json))
        .route("/docs", get(docs))
        .route("/docs/", get(docs))
        .route("/api/session/create", post(create_session))
        .route("/api/session/list", get(list_sessions))
        .route("/api/session/{session_id}", get(get_session))
        .route("/api/session/{session_id}/messages", get(list_messages))
        .route(
            "/api/upload",
            post(upload_file).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/api/chat", post(chat))
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> Result<CorsLayer> {
    let origins: Vec<&str> = origins
        .iter()
        .map(|origin| origin.trim())
        .filter(|origin| !origin.is_empty())
        .collect();
    if origins.contains(&"*") {
        return Ok(CorsLayer::permissive());
    }
    let origins = origins
        .into_iter()
        .map(|origin| {
            HeaderValue::from_str(origin)
                .with_context(|| format!("invalid CORS origin: {origin:?}"))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(Any)
        .allow_headers(Any))
}

async fn root() -> Json<serde_json::Value> {
    Json(json!({
        "message": "Chat Stream API",
        "version": env!("CARGO_PKG_VERSION"),
        "docs": "/docs",
    }))
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "healthy" }))
}

async fn openapi_json() -> Json<serde_json::Value> {
    Json(openapi_spec())
}

async fn docs() -> Html<String> {
    Html(scalar_docs_html("/openapi.json"))
}

async fn session_response(
    store: &dyn SessionStore,
    session: SessionRecord,
) -> ApiResult<SessionResponse> {
    let message_count = store.message_count(&session.session_id).await?;
    Ok(SessionResponse {
        session_id: session.session_id,
        title: session.title,
        created_at: session.created_at,
        last_activity_at: session.last_activity_at,
        message_count,
    })
}

async fn require_session(state: &AppState, raw: String) -> ApiResult<SessionRecord> {
    let session_id = SessionId::from_string(raw);
    state
        .store()
        .get_session(&session_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("session not found: {session_id}")))
}

async fn create_session(
    State(state): State<AppState>,
    Json(request): Json<CreateSessionRequest>,
) -> ApiResult<Json<SessionResponse>> {
    let title = request
        .title
        .map(|title| title.trim().to_owned())
        .filter(|title| !title.is_empty())
        .unwrap_or_else(|| DEFAULT_SESSION_TITLE.to_owned());

    let session = state.store().create_session(title).await?;
    info!(session_id = %session.session_id, "session created");
    Ok(Json(session_response(state.store().as_ref(), session).await?))
}

async fn list_sessions(State(state): State<AppState>) -> ApiResult<Json<Vec<SessionResponse>>> {
    let sessions = state.store().list_sessions(SESSION_LIST_LIMIT).await?;
    let mut responses = Vec::with_capacity(sessions.len());
    for session in sessions {
        responses.push(session_response(state.store().as_ref(), session).await?);
    }
    Ok(Json(responses))
}

async fn get_session(
    Path(session_id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<Json<SessionResponse>> {
    let session = require_session(&state, session_id).await?;
    Ok(Json(session_response(state.store().as_ref(), session).await?))
}

async fn list_messages(
    Path(session_id): Path<String>,
    Query(query): Query<MessageListQuery>,
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<MessageRecord>>> {
    let session = require_session(&state, session_id).await?;
    let messages = state
        .store()
        .list_messages(&session.session_id, query.limit)
        .await?;
    Ok(Json(messages))
}

struct UploadForm {
    session_id: Option<String>,
    filename: String,
    content_type: String,
    data: Option<Vec<u8>>,
}

async fn read_upload_form(mut multipart: Multipart) -> ApiResult<UploadForm> {
    let mut form = UploadForm {
        session_id: None,
        filename: DEFAULT_FILENAME.to_owned(),
        content_type: String::new(),
        data: None,
    };
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_owned();
        match name.as_str() {
            "session_id" => form.session_id = Some(field.text().await.map_err(multipart_error)?),
            "file" => {
                if let Some(filename) = field.file_name().filter(|name| !name.is_empty()) {
                    form.filename = filename.to_owned();
                }
                form.content_type = field.content_type().unwrap_or_default().to_owned();
                form.data = Some(field.bytes().await.map_err(multipart_error)?.to_vec());
            }
            other => debug!(field = other, "ignoring multipart field"),
        }
    }
    Ok(form)
}

fn multipart_error(error: axum::extract::multipart::MultipartError) -> ApiError {
    ApiError {
        status: error.status(),
        message: format!("invalid multipart body: {error}"),
    }
}

async fn upload_file(
    State(state): State<AppState>,
    multipart: Multipart,
) -> ApiResult<Json<FileUploadResponse>> {
    let form = read_upload_form(multipart).await?;
    let session_id = form
        .session_id
        .ok_or_else(|| ApiError::bad_request("missing form field: session_id"))?;
    let data = form
        .data
        .ok_or_else(|| ApiError::bad_request("missing form field: file"))?;

    if let Err(error) = state.uploads.validate(&form.content_type, &data) {
        warn!(%error, filename = %form.filename, "upload rejected");
        return Err(error.into());
    }
    let session = require_session(&state, session_id).await?;

    let file = state
        .store()
        .create_file(NewFile {
            session_id: session.session_id,
            filename: form.filename,
            file_type: form.content_type,
            data,
        })
        .await?;
    info!(file_id = %file.file_id, filename = %file.filename, bytes = file.file_size, "file uploaded");

    Ok(Json(FileUploadResponse {
        file_id: file.file_id,
        filename: file.filename,
        file_type: file.file_type,
        file_size: file.file_size,
        uploaded_at: file.uploaded_at,
    }))
}

async fn chat(State(state): State<AppState>, Json(body): Json<ChatBody>) -> Response {
    let request = ChatRequest {
        session_id: SessionId::from_string(body.session_id),
        content: body.content,
        file_ids: body
            .file_ids
            .unwrap_or_default()
            .into_iter()
            .map(FileId::from_string)
            .collect(),
    };
    let handle = state.runtime.start_turn(request);
    let request_id = handle.request_id().clone();
    let mut lines = handle.into_stream();

    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(
        HeaderName::from_static("x-accel-buffering"),
        HeaderValue::from_static("no"),
    );
    if let Ok(value) = HeaderValue::from_str(request_id.as_str()) {
        headers.insert(HeaderName::from_static("x-request-id"), value);
    }

    let body = stream! {
        while let Some(line) = lines.next().await {
            yield Ok::<_, Infallible>(line);
        }
        debug!(%request_id, "chat stream closed");
    };

    (headers, Body::from_stream(body)).into_response()
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::error!(%error, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    {
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(error) => {
                    tracing::error!(%error, "failed to install SIGTERM handler");
                }
            }
        };

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await;
    }
}
