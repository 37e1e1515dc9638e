use std::sync::Arc;

use axum::Router;
use axum::extract::{DefaultBodyLimit, Path, Query, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use base64::Engine as _;
use serde::Deserialize;
use tower_http::trace::TraceLayer;

use crate::app::service::DocumentService;
use crate::error::Error;
use crate::formats::Version;

/// Uploads arrive base64-encoded inside JSON.
const MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

pub fn router(service: Arc<DocumentService>) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok\n" }))
        .route("/documents", get(list_documents).post(upload_document))
        .route("/documents/:id", get(get_document).delete(delete_document))
        .route("/documents/:id/structure", get(get_structure))
        .route(
            "/documents/:id/enhanced",
            get(enhanced_availability).post(request_enhanced),
        )
        .route("/documents/:id/pages/:page", get(page_image))
        .route("/documents/:id/images/:image_ref", get(visual_image))
        .route("/documents/:id/heading", get(heading_page))
        .route("/admin/sweep", post(sweep))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}

type AppState = State<Arc<DocumentService>>;

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    kind: &'static str,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            kind: "bad_request",
            message: message.into(),
        }
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let status = match &err {
            Error::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Error::Persistence(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::DocumentNotFound(_) | Error::VersionNotFound { .. } | Error::NotFound(_) => {
                StatusCode::NOT_FOUND
            }
            Error::Extraction(_) => StatusCode::BAD_GATEWAY,
            Error::Conflict(_) => StatusCode::CONFLICT,
        };
        Self {
            status,
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(
                status = %self.status,
                kind = self.kind,
                error = %self.message,
                "request failed"
            );
        } else {
            tracing::debug!(
                status = %self.status,
                kind = self.kind,
                error = %self.message,
                "request rejected"
            );
        }
        let body = serde_json::json!({ "error": self.message, "kind": self.kind });
        (self.status, Json(body)).into_response()
    }
}

async fn list_documents(State(service): AppState) -> impl IntoResponse {
    let documents = service.list_documents().await;
    Json(serde_json::json!({ "documents": documents }))
}

#[derive(Debug, Deserialize)]
struct UploadRequest {
    /// Base64 document bytes.
    file: String,
    #[serde(default)]
    title: Option<String>,
}

async fn upload_document(
    State(service): AppState,
    Json(request): Json<UploadRequest>,
) -> Result<Response, ApiError> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(request.file.trim().as_bytes())
        .map_err(|err| ApiError::bad_request(format!("file is not valid base64: {err}")))?;
    let ingested = service.ingest(&bytes, request.title.as_deref()).await?;
    let status = if ingested.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(ingested)).into_response())
}

async fn get_document(
    State(service): AppState,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(service.get_document(&id).await?))
}

async fn delete_document(
    State(service): AppState,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(service.delete_document(&id).await?))
}

#[derive(Debug, Deserialize)]
struct StructureQuery {
    #[serde(default)]
    version: Option<Version>,
}

async fn get_structure(
    State(service): AppState,
    Path(id): Path<String>,
    Query(query): Query<StructureQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let version = query.version.unwrap_or(Version::Regular);
    Ok(Json(service.get_structure(&id, version).await?))
}

async fn enhanced_availability(
    State(service): AppState,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(service.is_enhanced_available(&id).await?))
}

#[derive(Debug, Deserialize)]
struct EnhanceQuery {
    #[serde(default)]
    force: bool,
}

async fn request_enhanced(
    State(service): AppState,
    Path(id): Path<String>,
    Query(query): Query<EnhanceQuery>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(service.request_enhanced(&id, query.force).await?))
}

async fn page_image(
    State(service): AppState,
    Path((id, page)): Path<(String, u32)>,
) -> Result<Response, ApiError> {
    let bytes = service.page_image(&id, page).await?;
    Ok(image_response(bytes))
}

async fn visual_image(
    State(service): AppState,
    Path((id, image_ref)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let bytes = service.visual_image(&id, &image_ref).await?;
    Ok(image_response(bytes))
}

#[derive(Debug, Deserialize)]
struct HeadingQuery {
    text: String,
    #[serde(default)]
    version: Option<Version>,
}

async fn heading_page(
    State(service): AppState,
    Path(id): Path<String>,
    Query(query): Query<HeadingQuery>,
) -> Result<impl IntoResponse, ApiError> {
    if query.text.trim().is_empty() {
        return Err(ApiError::bad_request("text is required"));
    }
    let version = query.version.unwrap_or(Version::Regular);
    Ok(Json(service.heading_page(&id, version, &query.text).await?))
}

async fn sweep(State(service): AppState) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(service.sweep().await?))
}

fn image_response(bytes: Vec<u8>) -> Response {
    let content_type = sniff_content_type(&bytes);
    let mut resp = Response::new(axum::body::Body::from(bytes));
    resp.headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    resp
}

fn sniff_content_type(bytes: &[u8]) -> &'static str {
    if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
        "image/png"
    } else if bytes.starts_with(&[0xff, 0xd8, 0xff]) {
        "image/jpeg"
    } else {
        "application/octet-stream"
    }
}
