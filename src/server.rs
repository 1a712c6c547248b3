//! Axum router over the generation service.
//!
//! Handlers only validate input and map results to JSON; all pipeline work
//! happens in [`GenerationService`].

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;

use crate::error::SketchbookError;
use crate::response::{BatchDiaryResponse, DeleteResponse, ErrorResponse, Status};
use crate::service::GenerationService;

/// Largest accepted upload body (20MB).
pub const MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<GenerationService>,
}

/// Build the full router. `media_dir`, when set, is served under `/media`.
pub fn build_router(service: Arc<GenerationService>, media_dir: Option<PathBuf>) -> Router {
    let state = AppState { service };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let uploads = Router::new()
        .route("/animate/upload", post(animate_upload))
        .route("/stylize/upload", post(stylize_upload))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(state.clone());

    let api = Router::new()
        .route("/health", get(health))
        .route("/generate-diary", post(generate_diary))
        .route("/diary", post(diary))
        .route("/animate", post(animate))
        .route("/stylize", post(stylize))
        .route("/assets", delete(delete_asset))
        .with_state(state);

    let mut router = Router::new().merge(api).merge(uploads);

    if let Some(dir) = media_dir {
        router = router.nest_service("/media", ServeDir::new(dir));
    }

    router.layer(cors)
}

/// Bind `bind_addr`, spawn the server, and return the bound address.
pub async fn start_server(router: Router, bind_addr: SocketAddr) -> std::io::Result<SocketAddr> {
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    let addr = listener.local_addr()?;

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            tracing::error!("server error: {e}");
        }
    });

    tracing::info!(%addr, "listening");
    Ok(addr)
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Handler error rendered as an [`ErrorResponse`].
pub enum ApiError {
    BadRequest(String),
    Service(SketchbookError),
}

impl From<SketchbookError> for ApiError {
    fn from(e: SketchbookError) -> Self {
        ApiError::Service(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::Service(e) => {
                let status = StatusCode::from_u16(e.http_status())
                    .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                (status, e.user_message())
            }
        };
        (status, Json(ErrorResponse::new(message))).into_response()
    }
}

fn require(field: &str, value: &str) -> Result<(), ApiError> {
    if value.trim().is_empty() {
        return Err(ApiError::BadRequest(format!("{field} must not be empty")));
    }
    Ok(())
}

fn require_url(field: &str, value: &str) -> Result<(), ApiError> {
    require(field, value)?;
    if !(value.starts_with("http://") || value.starts_with("https://")) {
        return Err(ApiError::BadRequest(format!("{field} must be an http(s) URL")));
    }
    Ok(())
}

/// 200 for a success status, 502 otherwise.
fn status_code(status: Status) -> StatusCode {
    match status {
        Status::Success => StatusCode::OK,
        Status::Error => StatusCode::BAD_GATEWAY,
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// GET /health
async fn health(State(app): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "pipelines": app.service.pipelines(),
    }))
}

#[derive(Deserialize)]
pub struct DiaryBatchRequest {
    pub user_text: Vec<String>,
}

/// POST /generate-diary: one entry per input text, in input order.
async fn generate_diary(
    State(app): State<AppState>,
    Json(body): Json<DiaryBatchRequest>,
) -> Json<BatchDiaryResponse> {
    let results = app.service.run_batch(body.user_text).await;
    Json(BatchDiaryResponse { results })
}

#[derive(Deserialize)]
pub struct DiaryRequest {
    pub text: String,
}

/// POST /diary
async fn diary(
    State(app): State<AppState>,
    Json(body): Json<DiaryRequest>,
) -> Result<Response, ApiError> {
    require("text", &body.text)?;
    let entry = app.service.generate_illustration(&body.text).await?;
    Ok(Json(entry).into_response())
}

#[derive(Deserialize)]
pub struct ImageRequest {
    pub image_url: String,
    pub prompt: String,
}

/// POST /animate
async fn animate(
    State(app): State<AppState>,
    Json(body): Json<ImageRequest>,
) -> Result<Response, ApiError> {
    require_url("image_url", &body.image_url)?;
    require("prompt", &body.prompt)?;
    let response = app.service.animate(&body.image_url, &body.prompt).await;
    Ok((status_code(response.status), Json(response)).into_response())
}

/// POST /stylize
async fn stylize(
    State(app): State<AppState>,
    Json(body): Json<ImageRequest>,
) -> Result<Response, ApiError> {
    require_url("image_url", &body.image_url)?;
    require("prompt", &body.prompt)?;
    let response = app.service.stylize(&body.image_url, &body.prompt).await;
    Ok((status_code(response.status), Json(response)).into_response())
}

/// Image bytes plus prompt from a multipart upload.
struct UploadForm {
    image: Vec<u8>,
    content_type: String,
    prompt: String,
}

async fn read_upload(mut multipart: Multipart) -> Result<UploadForm, ApiError> {
    let mut image = None;
    let mut prompt = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("invalid multipart body: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "image" => {
                let content_type = field.content_type().unwrap_or("").to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("failed to read image: {e}")))?;
                image = Some((bytes.to_vec(), content_type));
            }
            "prompt" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("failed to read prompt: {e}")))?;
                prompt = Some(text);
            }
            _ => {}
        }
    }

    let (image, content_type) =
        image.ok_or_else(|| ApiError::BadRequest("missing image field".to_string()))?;
    let prompt = prompt.ok_or_else(|| ApiError::BadRequest("missing prompt field".to_string()))?;
    require("prompt", &prompt)?;
    if image.is_empty() {
        return Err(ApiError::BadRequest("image must not be empty".to_string()));
    }

    Ok(UploadForm {
        image,
        content_type,
        prompt,
    })
}

/// POST /animate/upload (multipart: `image`, `prompt`)
async fn animate_upload(
    State(app): State<AppState>,
    multipart: Multipart,
) -> Result<Response, ApiError> {
    let form = read_upload(multipart).await?;
    let response = app
        .service
        .animate_upload(form.image, &form.content_type, &form.prompt)
        .await;
    Ok((status_code(response.status), Json(response)).into_response())
}

/// POST /stylize/upload (multipart: `image`, `prompt`)
async fn stylize_upload(
    State(app): State<AppState>,
    multipart: Multipart,
) -> Result<Response, ApiError> {
    let form = read_upload(multipart).await?;
    let response = app
        .service
        .stylize_upload(form.image, &form.content_type, &form.prompt)
        .await;
    Ok((status_code(response.status), Json(response)).into_response())
}

#[derive(Deserialize)]
pub struct DeleteRequest {
    pub url: String,
}

/// DELETE /assets
async fn delete_asset(
    State(app): State<AppState>,
    Json(body): Json<DeleteRequest>,
) -> Result<Json<DeleteResponse>, ApiError> {
    require("url", &body.url)?;
    let deleted = app.service.delete_asset(&body.url).await;
    Ok(Json(DeleteResponse { deleted }))
}
