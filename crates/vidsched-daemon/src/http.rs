//! Local HTTP service for the UI.
//!
//! Serves uploads, stored videos and the two JSON documents on the loopback
//! interface only:
//!
//! • `POST /upload`              multipart, one binary field named `file`
//! • `GET  /videos/:filename`    streamed asset, honours `Range`
//! • `GET|POST /schedules`       schedule document
//! • `GET|POST /playlist`        playlist document
//!
//! The service keeps no state of its own; everything durable lives in the
//! asset and document stores it is handed at startup.
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::multipart::{MultipartError, MultipartRejection};
use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::{debug, error, info, warn};

use vidsched_store::assets::locator;
use vidsched_store::config::ServerConfig;
use vidsched_store::{AssetStore, ByteRange, DocumentKind, DocumentStore, StoreError};

use crate::error::ServiceError;

/// Multipart field that carries the uploaded file.
pub const UPLOAD_FIELD: &str = "file";

/// How long in-flight requests may run after shutdown was requested.
pub const SHUTDOWN_DRAIN: Duration = Duration::from_secs(5);

// ── Shared state ──────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct AppState {
    pub assets: Arc<AssetStore>,
    pub documents: Arc<DocumentStore>,
    /// `http://127.0.0.1:<port>`, used to build asset locators.
    pub base_url: String,
}

#[derive(Debug, Clone, Copy)]
pub struct ServiceOptions {
    pub port: u16,
    pub max_body_bytes: u64,
}

impl From<&ServerConfig> for ServiceOptions {
    fn from(config: &ServerConfig) -> Self {
        Self {
            port: config.port,
            max_body_bytes: config.max_upload_bytes,
        }
    }
}

#[derive(Debug, Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct UploadResponse {
    /// Original file name, for display.
    pub name: String,
    /// Storage name, used to address the asset.
    pub filename: String,
    pub url: String,
}

#[derive(Debug, Serialize)]
struct WriteResponse {
    success: bool,
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Request-scoped failure, rendered as `{"error": "..."}`.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Multipart(MultipartError),
    Json(JsonRejection),
    Store(StoreError),
    Internal(String),
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        ApiError::Store(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Multipart(e) => {
                warn!("Rejected upload: {}", e.body_text());
                (e.status(), e.body_text())
            }
            ApiError::Json(rejection) => {
                debug!("Rejected document body: {}", rejection.body_text());
                (rejection.status(), rejection.body_text())
            }
            ApiError::Store(e @ StoreError::AssetNotFound { .. }) => {
                debug!("{}", e);
                (StatusCode::NOT_FOUND, e.to_string())
            }
            ApiError::Store(e) => {
                error!("Storage failure: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
            ApiError::Internal(msg) => {
                error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

// ── Route handlers ────────────────────────────────────────────────────────────

async fn upload(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadResponse>, ApiError> {
    // A body that is not multipart at all carries no file either.
    let Ok(mut multipart) = multipart else {
        return Err(no_file());
    };

    while let Some(mut field) = multipart.next_field().await.map_err(ApiError::Multipart)? {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        // Browsers send `filename=""` when no file was chosen.
        let Some(original_name) = field
            .file_name()
            .filter(|name| !name.is_empty())
            .map(str::to_string)
        else {
            continue;
        };

        // Dropping `pending` on any error below removes the partial file.
        let mut pending = state.assets.begin(&original_name).await?;
        while let Some(chunk) = field.chunk().await.map_err(ApiError::Multipart)? {
            pending.write(&chunk).await?;
        }
        let asset = pending.finish().await?;

        let url = locator(&state.base_url, &asset.storage_name);
        return Ok(Json(UploadResponse {
            name: asset.original_name,
            filename: asset.storage_name,
            url,
        }));
    }

    Err(no_file())
}

fn no_file() -> ApiError {
    ApiError::BadRequest("No file uploaded".to_string())
}

async fn serve_video(
    State(state): State<AppState>,
    Path(filename): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let reader = state.assets.retrieve(&filename).await?;
    let total = reader.len();

    let requested = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(ByteRange::parse);

    let span = match requested {
        None => None,
        Some(range) => match range.resolve(total) {
            Some(span) => Some(span),
            None => {
                debug!("Unsatisfiable range {:?} for {} ({} bytes)", range, filename, total);
                return Ok((
                    StatusCode::RANGE_NOT_SATISFIABLE,
                    [
                        (header::CONTENT_RANGE, format!("bytes */{}", total)),
                        (header::ACCEPT_RANGES, "bytes".to_string()),
                    ],
                )
                    .into_response());
            }
        },
    };

    let content_type = mime_guess::from_path(&filename).first_or_octet_stream();
    let length = span.map(|(start, end)| end - start + 1).unwrap_or(total);

    let mut builder = Response::builder()
        .header(header::CONTENT_TYPE, content_type.as_ref())
        .header(header::CONTENT_LENGTH, length)
        .header(header::ACCEPT_RANGES, "bytes");
    builder = match span {
        Some((start, end)) => builder
            .status(StatusCode::PARTIAL_CONTENT)
            .header(header::CONTENT_RANGE, format!("bytes {}-{}/{}", start, end, total)),
        None => builder.status(StatusCode::OK),
    };

    let body = Body::from_stream(ReaderStream::new(reader.into_reader(span).await?));
    builder
        .body(body)
        .map_err(|e| ApiError::Internal(e.to_string()))
}

async fn read_document(state: &AppState, kind: DocumentKind) -> Result<Json<Value>, ApiError> {
    Ok(Json(state.documents.read(kind).await?))
}

async fn write_document(
    state: &AppState,
    kind: DocumentKind,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<WriteResponse>, ApiError> {
    let Json(content) = body.map_err(ApiError::Json)?;
    if !(content.is_array() || content.is_object()) {
        return Err(ApiError::BadRequest(format!(
            "{} must be a JSON array or object",
            kind
        )));
    }

    state.documents.write(kind, &content).await?;
    info!("Saved {} document", kind);
    Ok(Json(WriteResponse { success: true }))
}

async fn get_schedule(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    read_document(&state, DocumentKind::Schedule).await
}

async fn put_schedule(
    State(state): State<AppState>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<WriteResponse>, ApiError> {
    write_document(&state, DocumentKind::Schedule, body).await
}

async fn get_playlist(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    read_document(&state, DocumentKind::Playlist).await
}

async fn put_playlist(
    State(state): State<AppState>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<WriteResponse>, ApiError> {
    write_document(&state, DocumentKind::Playlist, body).await
}

pub fn router(state: AppState, max_body_bytes: u64) -> Router {
    let limit = usize::try_from(max_body_bytes).unwrap_or(usize::MAX);

    Router::new()
        .route("/upload", post(upload))
        .route("/videos/:filename", get(serve_video))
        .route("/schedules", get(get_schedule).post(put_schedule))
        .route("/playlist", get(get_playlist).post(put_playlist))
        .layer(DefaultBodyLimit::max(limit))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ── Server startup ────────────────────────────────────────────────────────────

/// Handle on a running service task.
pub struct ServiceHandle {
    token: CancellationToken,
    task: tokio::task::JoinHandle<()>,
    ready: Option<oneshot::Receiver<Result<SocketAddr, ServiceError>>>,
    local_addr: Option<SocketAddr>,
}

impl ServiceHandle {
    /// Resolves once the listener is bound (or failed to bind).
    pub async fn ready(&mut self) -> Result<SocketAddr, ServiceError> {
        if let Some(addr) = self.local_addr {
            return Ok(addr);
        }
        let rx = self.ready.take().ok_or(ServiceError::NotStarted)?;
        let addr = rx.await.map_err(|_| ServiceError::NotStarted)??;
        self.local_addr = Some(addr);
        Ok(addr)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Stop accepting connections, give in-flight requests [`SHUTDOWN_DRAIN`]
    /// to finish, then stop the task.
    pub async fn shutdown(self) {
        let ServiceHandle { token, mut task, .. } = self;
        token.cancel();

        match tokio::time::timeout(SHUTDOWN_DRAIN, &mut task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Service task ended abnormally: {}", e),
            Err(_) => {
                warn!(
                    "Service did not drain within {:?}, aborting open connections",
                    SHUTDOWN_DRAIN
                );
                task.abort();
                let _ = task.await;
            }
        }
    }
}

/// Spawn the service on `127.0.0.1:<port>`. Await [`ServiceHandle::ready`]
/// before handing the address to anyone.
pub fn start_server(
    options: ServiceOptions,
    assets: Arc<AssetStore>,
    documents: Arc<DocumentStore>,
) -> ServiceHandle {
    let token = CancellationToken::new();
    let (ready_tx, ready_rx) = oneshot::channel();

    let shutdown = token.clone();
    let task = tokio::spawn(async move {
        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, options.port));
        let bound = match TcpListener::bind(addr).await {
            Ok(listener) => listener.local_addr().map(|local| (listener, local)),
            Err(e) => Err(e),
        };
        let (listener, local_addr) = match bound {
            Ok(b) => b,
            Err(e) => {
                error!("Failed to bind backend on {}: {}", addr, e);
                let _ = ready_tx.send(Err(ServiceError::Bind { addr, source: e }));
                return;
            }
        };

        let state = AppState {
            assets,
            documents,
            base_url: format!("http://{}", local_addr),
        };
        let app = router(state, options.max_body_bytes);

        info!("Backend listening on http://{}", local_addr);
        let _ = ready_tx.send(Ok(local_addr));

        let serve = axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await });
        if let Err(e) = serve.await {
            error!("Backend server error: {}", e);
        }
        info!("Backend on {} stopped", local_addr);
    });

    ServiceHandle {
        token,
        task,
        ready: Some(ready_rx),
        local_addr: None,
    }
}
