// HTTP surface: upload endpoint plus health and monitoring routes

use axum::{
    extract::{multipart::MultipartError, DefaultBodyLimit, Multipart, State},
    http::{header, HeaderName, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use bytes::Bytes;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::core::config::Config;
use crate::core::errors::{ExtractionError, InputError, PipelineError};
use crate::core::types::{FileReport, InputFile};
use crate::orchestration::{package, PipelineOrchestrator};
use crate::utils::Metrics;

/// Multipart framing on top of the file itself
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Name of the multipart field carrying the upload
pub const FILE_FIELD: &str = "file";

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub orchestrator: Arc<PipelineOrchestrator>,
    pub metrics: Metrics,
}

impl AppState {
    pub fn new(config: Arc<Config>, orchestrator: Arc<PipelineOrchestrator>, metrics: Metrics) -> Self {
        Self {
            config,
            orchestrator,
            metrics,
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let body_limit = state.config.max_file_size().saturating_add(MULTIPART_OVERHEAD);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/health/api-keys", get(health_api_keys))
        .route("/metrics", get(metrics_endpoint))
        .route("/stats", get(stats_endpoint))
        .route("/upload", post(upload))
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

/// JSON error body: `{"error": <code>, "message": <user message>}`
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    message: &'a str,
}

impl AppError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.code,
            message: &self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<InputError> for AppError {
    fn from(e: InputError) -> Self {
        let status = match e {
            InputError::FileTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            _ => StatusCode::BAD_REQUEST,
        };
        Self::new(status, "invalid_input", e.to_string())
    }
}

impl From<MultipartError> for AppError {
    fn from(e: MultipartError) -> Self {
        let status = e.status();
        if status == StatusCode::PAYLOAD_TOO_LARGE {
            return Self::new(status, "invalid_input", "File too large");
        }
        Self::new(status, "invalid_input", format!("Malformed upload: {}", e.body_text()))
    }
}

impl From<PipelineError> for AppError {
    fn from(e: PipelineError) -> Self {
        let status = match &e {
            PipelineError::InvalidInput(InputError::FileTooLarge { .. }) => StatusCode::PAYLOAD_TOO_LARGE,
            PipelineError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            PipelineError::Extraction(ExtractionError::PdfEngineUnavailable(_)) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            PipelineError::Extraction(ExtractionError::Timeout(_)) => StatusCode::GATEWAY_TIMEOUT,
            PipelineError::Extraction(ExtractionError::Io(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            PipelineError::Extraction(_)
            | PipelineError::ImageFailed { .. }
            | PipelineError::AllImagesFailed { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            PipelineError::Packaging(_) | PipelineError::TaskJoinFailed(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self::new(status, e.code(), e.user_message())
    }
}

async fn root(State(state): State<AppState>) -> Json<serde_json::Value> {
    let formats = &state.config.formats;
    Json(json!({
        "title": "Arabic Image Translator",
        "version": env!("CARGO_PKG_VERSION"),
        "upload": format!("POST /upload (multipart field '{}')", FILE_FIELD),
        "supported_formats": {
            "image": formats.image,
            "pdf": formats.pdf,
            "archive": formats.archive,
        },
        "max_upload_mb": state.config.max_file_size() / (1024 * 1024),
        "source_language": state.config.source_language(),
        "target_language": state.config.target_language(),
        "ocr_available": state.orchestrator.detection_available(),
    }))
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.orchestrator.health())
}

/// API key health status endpoint
async fn health_api_keys(State(state): State<AppState>) -> Json<serde_json::Value> {
    let clients = state.orchestrator.api_health();
    let configured = clients.iter().any(|health| health.total_keys > 0);
    Json(json!({ "configured": configured, "clients": clients }))
}

/// Prometheus metrics endpoint
async fn metrics_endpoint(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.to_prometheus(),
    )
}

/// Detailed statistics endpoint (JSON)
async fn stats_endpoint(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.metrics.snapshot())
}

/// Translate one uploaded image, PDF or archive.
///
/// Responds with the translated PNG (one image) or a ZIP of PNGs (several).
async fn upload(State(state): State<AppState>, mut multipart: Multipart) -> Result<Response, AppError> {
    let mut upload: Option<(String, Bytes)> = None;

    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }
        let filename = field.file_name().unwrap_or_default().to_string();
        let data = field.bytes().await?;
        upload = Some((filename, data));
        break;
    }

    let (filename, data) = upload.ok_or(InputError::MissingFile)?;
    let input = InputFile::from_upload(&filename, data, &state.config).map_err(|e| {
        warn!("Rejected upload '{}': {}", filename, e);
        AppError::from(e)
    })?;
    info!(
        "Received {} ({:?}, {} bytes)",
        input.filename,
        input.kind,
        input.bytes.len()
    );

    let stem = input.stem().to_string();
    let outcome = state.orchestrator.process_file(input).await?;
    let packaged = package(&outcome.bundle, &stem).map_err(|e| {
        error!("Packaging failed: {}", e);
        AppError::from(PipelineError::from(e))
    })?;

    Ok(file_response(packaged.filename, packaged.content_type, packaged.bytes, &outcome.report))
}

fn file_response(filename: String, content_type: &'static str, body: Bytes, report: &FileReport) -> Response {
    let disposition = format!("attachment; filename=\"{}\"", header_safe(&filename));
    let headers = [
        (header::CONTENT_TYPE, content_type.to_string()),
        (header::CONTENT_DISPOSITION, disposition),
        (
            HeaderName::from_static("x-images-total"),
            report.total_images.to_string(),
        ),
        (
            HeaderName::from_static("x-images-dropped"),
            report.dropped.len().to_string(),
        ),
        (
            HeaderName::from_static("x-regions-untranslated"),
            report.regions_untranslated.to_string(),
        ),
    ];
    (StatusCode::OK, headers, body).into_response()
}

/// Visible ASCII only, without quotes or backslashes
fn header_safe(filename: &str) -> String {
    filename
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_ascii_graphic() || c == ' ' => c,
            _ => '_',
        })
        .collect()
}
