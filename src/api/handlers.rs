//! Route handlers

use axum::extract::multipart::MultipartRejection;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Multipart, Path, Query, State};
use axum::http::{header, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use super::error::{ApiError, ApiResult};
use super::state::AppState;
use crate::service::{ProcessOutcome, UploadRequest};

/// Multipart field carrying the image
pub const FILE_FIELD: &str = "file";

pub const X_FINGERPRINT: HeaderName = HeaderName::from_static("x-fingerprint");
pub const X_CACHE: HeaderName = HeaderName::from_static("x-cache");
pub const X_JOB_ID: HeaderName = HeaderName::from_static("x-job-id");
pub const X_IMAGE_ID: HeaderName = HeaderName::from_static("x-image-id");
pub const X_PROCESSING_TIME: HeaderName = HeaderName::from_static("x-processing-time-ms");

fn default_remove_bg() -> bool {
    true
}

/// Query parameters of `POST /remove-background`
#[derive(Debug, Deserialize)]
pub struct RemoveParams {
    pub vendor_id: String,
    pub folder_id: Option<String>,
    #[serde(default = "default_remove_bg")]
    pub remove_bg: bool,
}

/// Body of `POST /vendor-folders/{vendor_id}`
#[derive(Debug, Deserialize)]
pub struct CreateFolder {
    pub folder_name: String,
}

fn parse_id(kind: &str, value: &str) -> ApiResult<Uuid> {
    Uuid::parse_str(value)
        .map_err(|_| ApiError::bad_request(format!("Invalid {} ID format: {}", kind, value)))
}

/// GET /
pub async fn root() -> Json<Value> {
    Json(json!({
        "service": "Background Removal API",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "operational",
        "endpoints": [
            {"path": "/", "method": "GET", "description": "Service information"},
            {"path": "/health", "method": "GET", "description": "Health check with cache and worker statistics"},
            {"path": "/remove-background", "method": "POST",
                "description": "Upload an image (multipart field 'file') and optionally remove its background"},
            {"path": "/vendor-images/{vendor_id}", "method": "GET",
                "description": "Get all images for a vendor"},
            {"path": "/vendor-images/{vendor_id}/{folder_id}", "method": "GET",
                "description": "Get images for a vendor in a specific folder"},
            {"path": "/images/{image_id}", "method": "DELETE",
                "description": "Delete a specific image by ID"},
            {"path": "/vendor-folders/{vendor_id}", "method": "POST",
                "description": "Create a folder for a vendor"},
            {"path": "/vendor-folders/{vendor_id}", "method": "GET",
                "description": "Get all folders for a vendor"},
            {"path": "/folders/{folder_id}", "method": "DELETE",
                "description": "Delete a folder and all its images"},
        ]
    }))
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Response {
    let report = state.service.health().await;
    let status = if report.pool.accepting {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report)).into_response()
}

/// POST /remove-background
///
/// Reads the `file` field, runs it through the removal service and returns
/// the resulting image bytes.
pub async fn remove_background(
    State(state): State<AppState>,
    params: Result<Query<RemoveParams>, QueryRejection>,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiResult<Response> {
    let Query(params) = params.map_err(|rejection| ApiError::Request {
        status: rejection.status(),
        message: rejection.body_text(),
    })?;
    if params.vendor_id.trim().is_empty() {
        return Err(ApiError::bad_request("vendor_id must not be empty"));
    }
    let folder_id = params.folder_id.filter(|f| !f.is_empty());
    if let Some(folder) = &folder_id {
        parse_id("folder", folder)?;
    }
    let mut multipart = multipart.map_err(|rejection| ApiError::Request {
        status: rejection.status(),
        message: rejection.body_text(),
    })?;

    let mut upload = None;
    while let Some(field) = multipart.next_field().await.map_err(|e| ApiError::Request {
        status: e.status(),
        message: e.body_text(),
    })? {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }
        let filename = field.file_name().map(str::to_string);
        let data = field.bytes().await.map_err(|e| ApiError::Request {
            status: e.status(),
            message: e.body_text(),
        })?;
        upload = Some((filename, data));
        break;
    }

    let Some((filename, data)) = upload else {
        return Err(ApiError::bad_request(format!(
            "Missing multipart field '{}'",
            FILE_FIELD
        )));
    };

    let mut request = UploadRequest::new(params.vendor_id, data.to_vec())
        .remove_background(params.remove_bg);
    if let Some(name) = filename {
        request = request.with_filename(name);
    }
    if let Some(folder) = folder_id {
        request = request.with_folder(folder);
    }

    let outcome = state.service.process(request).await?;
    Ok(image_response(&outcome))
}

fn image_response(outcome: &ProcessOutcome) -> Response {
    let mut response = outcome.data.to_vec().into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(outcome.content_type),
    );
    headers.insert(X_CACHE, HeaderValue::from_static(outcome.cache.as_str()));
    for (name, value) in [
        (X_FINGERPRINT, outcome.job.fingerprint.to_string()),
        (X_JOB_ID, outcome.job.id.to_string()),
        (X_IMAGE_ID, outcome.image_id.to_string()),
        (
            X_PROCESSING_TIME,
            outcome.processing_time.as_millis().to_string(),
        ),
    ] {
        if let Ok(value) = HeaderValue::from_str(&value) {
            headers.insert(name, value);
        }
    }
    response
}

/// GET /vendor-images/{vendor_id}
pub async fn vendor_images(
    State(state): State<AppState>,
    Path(vendor_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let images = state.service.vendor_images(&vendor_id).await?;
    Ok(Json(json!({
        "vendor_id": vendor_id,
        "count": images.len(),
        "images": images,
    })))
}

/// GET /vendor-images/{vendor_id}/{folder_id}
pub async fn folder_images(
    State(state): State<AppState>,
    Path((vendor_id, folder_id)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    parse_id("folder", &folder_id)?;
    let (folder, images) = state.service.folder_images(&vendor_id, &folder_id).await?;
    Ok(Json(json!({
        "vendor_id": vendor_id,
        "folder_id": folder_id,
        "folder_name": folder.folder_name,
        "count": images.len(),
        "images": images,
    })))
}

/// DELETE /images/{image_id}
pub async fn delete_image(
    State(state): State<AppState>,
    Path(image_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let id = parse_id("image", &image_id)?;
    state.service.delete_image(id).await?;
    Ok(Json(json!({ "message": "Image deleted successfully" })))
}

/// POST /vendor-folders/{vendor_id}
pub async fn create_folder(
    State(state): State<AppState>,
    Path(vendor_id): Path<String>,
    body: Result<Json<CreateFolder>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let Json(body) = body.map_err(|rejection| ApiError::Request {
        status: rejection.status(),
        message: rejection.body_text(),
    })?;
    if body.folder_name.trim().is_empty() {
        return Err(ApiError::bad_request("folder_name must not be empty"));
    }

    let folder = state
        .service
        .create_folder(&vendor_id, &body.folder_name)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "folder_id": folder.id,
            "folder_name": folder.folder_name,
            "vendor_id": folder.vendor_id,
            "created_at": folder.created_at,
        })),
    ))
}

/// GET /vendor-folders/{vendor_id}
pub async fn list_folders(
    State(state): State<AppState>,
    Path(vendor_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let folders = state.service.list_folders(&vendor_id).await?;
    Ok(Json(json!({
        "vendor_id": vendor_id,
        "count": folders.len(),
        "folders": folders,
    })))
}

/// DELETE /folders/{folder_id}
pub async fn delete_folder(
    State(state): State<AppState>,
    Path(folder_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let id = parse_id("folder", &folder_id)?;
    let deleted_images = state.service.delete_folder(id).await?;
    Ok(Json(json!({
        "message": "Folder and its images deleted successfully",
        "deleted_images": deleted_images,
    })))
}
