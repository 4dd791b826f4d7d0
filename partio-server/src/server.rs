use crate::config::Config;
use partio_core::{
    Cancellation, Database, ErrorKind, PartioError, Result, UploadOrchestrator, parse_upload_id,
};
use axum::{
    Router,
    body::Body,
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use futures_util::{StreamExt, stream};
use serde::Serialize;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::io::{ReaderStream, StreamReader};
use tower_http::trace::TraceLayer;

const DEFAULT_FILE_NAME: &str = "my-file";
const STREAM_BUFFER_BYTES: usize = 64 * 1024;

pub struct ServerState {
    pub orchestrator: UploadOrchestrator,
    pub config: Config,
}

#[derive(Debug, Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct UploadResponse {
    upload_id: String,
}

pub fn build_orchestrator(config: &Config) -> Result<UploadOrchestrator> {
    let database = Database::open(config.database.path.clone())?;
    let content_store = config.build_content_store()?;
    let span = tracing::info_span!("partio", database = %database.path().display());

    UploadOrchestrator::new(database, content_store, config.upload_config(), span)
}

pub async fn run_server(config: Config) -> Result<()> {
    let orchestrator = build_orchestrator(&config)?;
    let bind_addr = config.bind_addr.clone();
    let max_upload_bytes = config.max_upload_bytes;
    let cleanup_interval = config.cleanup_interval_secs.map(Duration::from_secs);

    let state = Arc::new(ServerState {
        orchestrator,
        config,
    });

    if let Some(period) = cleanup_interval {
        let cleanup_state = state.clone();
        tokio::spawn(async move {
            cleanup_loop(cleanup_state, period).await;
        });
    }

    let app = router(state, max_upload_bytes);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("Server listening on {}", bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}

pub fn router(state: Arc<ServerState>, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/uploads", post(create_upload))
        .route("/uploads/:id", get(read_upload))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Runs one cleanup pass and reports what it removed.
pub async fn clean_once(orchestrator: &UploadOrchestrator) -> Result<()> {
    let result = orchestrator
        .clean_dangle_uploads(chrono::Utc::now(), &Cancellation::never())
        .await?;

    tracing::info!(
        "Cleanup removed {} uploads ({} stale parts, {} blobs)",
        result.uploads_deleted,
        result.stale_parts,
        result.blobs_removed
    );

    Ok(())
}

async fn cleanup_loop(state: Arc<ServerState>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    // First tick fires immediately; skip it so startup is not a cleanup.
    interval.tick().await;

    loop {
        interval.tick().await;

        if let Err(e) = clean_once(&state.orchestrator).await {
            tracing::warn!("Dangling upload cleanup failed: {}", e);
        }
    }
}

async fn health_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        axum::Json(serde_json::json!({ "status": "ok" })),
    )
}

async fn create_upload(
    State(state): State<Arc<ServerState>>,
    multipart: Multipart,
) -> Response {
    let cancel = Cancellation::never().with_timeout(state.config.request_timeout());

    match receive_upload(&state, multipart, &cancel).await {
        Ok(upload_id) => {
            let resp = ApiResponse {
                success: true,
                data: Some(UploadResponse { upload_id }),
                error: None,
            };
            (StatusCode::OK, axum::Json(resp)).into_response()
        }
        Err(e) => error_response(e),
    }
}

async fn receive_upload(
    state: &ServerState,
    mut multipart: Multipart,
    cancel: &Cancellation,
) -> Result<String> {
    let size_field = next_field(&mut multipart)
        .await?
        .ok_or_else(|| PartioError::Validation("file_size is expected".to_string()))?;
    if size_field.name() != Some("file_size") {
        return Err(PartioError::Validation("file_size is expected".to_string()));
    }
    let size_text = size_field.text().await.map_err(multipart_error)?;
    let size: u64 = size_text.trim().parse().map_err(|_| {
        PartioError::Validation(format!("file_size is not a byte count: {}", size_text))
    })?;

    let file_field = next_field(&mut multipart)
        .await?
        .ok_or_else(|| PartioError::Validation("file is expected".to_string()))?;
    if file_field.name() != Some("file") {
        return Err(PartioError::Validation("file is expected".to_string()));
    }
    let name = file_field
        .file_name()
        .filter(|name| !name.trim().is_empty())
        .unwrap_or(DEFAULT_FILE_NAME)
        .to_string();

    // Parts are cut straight off the request body as it arrives.
    let content = StreamReader::new(file_field.map(|chunk| {
        chunk.map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))
    }));
    tokio::pin!(content);

    let upload = state
        .orchestrator
        .create_upload(size, name, &mut content, cancel)
        .await?;

    Ok(upload.id.to_string())
}

async fn next_field(multipart: &mut Multipart) -> Result<Option<axum::extract::multipart::Field<'_>>> {
    multipart.next_field().await.map_err(multipart_error)
}

fn multipart_error(e: axum::extract::multipart::MultipartError) -> PartioError {
    PartioError::Validation(format!("malformed multipart body: {}", e))
}

async fn read_upload(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> Response {
    let upload_id = match parse_upload_id(&id) {
        Ok(id) => id,
        Err(e) => return error_response(e),
    };
    let cancel = Cancellation::never().with_timeout(state.config.request_timeout());

    let (mut writer, reader) = tokio::io::duplex(STREAM_BUFFER_BYTES);
    let reader_state = state.clone();
    let mut transfer = tokio::spawn(async move {
        reader_state
            .orchestrator
            .read_upload(upload_id, &mut writer, &cancel)
            .await
    });

    // Hold the status line until the first bytes arrive or the read ends, so
    // lookup failures still get a proper error response.
    let mut reader = BufReader::new(reader);
    let started = match reader.fill_buf().await {
        Ok(buffered) => !buffered.is_empty(),
        Err(_) => false,
    };

    if !started {
        return match (&mut transfer).await {
            Ok(Ok(_)) => octet_stream(Body::empty()),
            Ok(Err(e)) => error_response(e),
            Err(e) => error_response(PartioError::Internal(e.to_string())),
        };
    }

    // A part failing mid-stream aborts the body instead of ending it cleanly.
    let outcome = stream::once(transfer).filter_map(move |joined| async move {
        let error = match joined {
            Ok(Ok(_)) => return None,
            Ok(Err(e)) => e,
            Err(e) => PartioError::Internal(e.to_string()),
        };
        tracing::error!("Streaming upload {} failed: {}", upload_id, error);
        Some(Err(io::Error::new(io::ErrorKind::Other, error.to_string())))
    });

    octet_stream(Body::from_stream(ReaderStream::new(reader).chain(outcome)))
}

fn octet_stream(body: Body) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/octet-stream")],
        body,
    )
        .into_response()
}

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::BackendUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::Cancelled => StatusCode::REQUEST_TIMEOUT,
        ErrorKind::Io
        | ErrorKind::Transaction
        | ErrorKind::Database
        | ErrorKind::Config
        | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(e: PartioError) -> Response {
    let status = status_for(e.kind());
    if status.is_server_error() {
        tracing::error!("Request failed: {}", e);
    } else {
        tracing::debug!("Request rejected: {}", e);
    }

    let resp = ApiResponse::<()> {
        success: false,
        data: None,
        error: Some(e.to_string()),
    };
    (status, axum::Json(resp)).into_response()
}
