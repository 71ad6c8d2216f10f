//! Upload Handlers
//!
//! Multipart document uploads run through the upload gate, plus confined
//! deletion of stored files.

use axum::{
    extract::{
        multipart::{Field, MultipartError, MultipartRejection},
        Multipart, Path, State,
    },
    http::{HeaderMap, StatusCode},
    Json,
};
use tracing::{info, warn};

use crate::api::AppState;
use crate::error::UploadError;
use crate::models::{DeleteUploadRequest, DeleteUploadResponse, UploadResponse};
use crate::upload::{DocumentConfig, FileMeta, StoredFile, UploadGate};

/// Header carrying the authenticated citizen or user id.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Handler for POST /uploads
///
/// Validates against the global security policy only.
pub async fn upload_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadResponse>, UploadError> {
    let files = accept_upload(&state.uploads, &headers, multipart?, &[]).await?;
    Ok(Json(UploadResponse { files }))
}

/// Handler for POST /uploads/:service_id
///
/// Additionally validates against the service's document requirements.
pub async fn service_upload_handler(
    State(state): State<AppState>,
    Path(service_id): Path<String>,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadResponse>, UploadError> {
    let configs = state.catalog.configs(&service_id);
    let files = accept_upload(&state.uploads, &headers, multipart?, configs).await?;
    info!(service = %service_id, files = files.len(), "service documents uploaded");
    Ok(Json(UploadResponse { files }))
}

/// Handler for DELETE /uploads
///
/// Paths outside the upload root, and missing files, yield 404.
pub async fn delete_upload_handler(
    State(state): State<AppState>,
    Json(req): Json<DeleteUploadRequest>,
) -> (StatusCode, Json<DeleteUploadResponse>) {
    let deleted = state.uploads.store().secure_delete_file(&req.path).await;
    let status = if deleted {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    };
    (
        status,
        Json(DeleteUploadResponse {
            deleted,
            path: req.path,
        }),
    )
}

impl From<MultipartRejection> for UploadError {
    fn from(rejection: MultipartRejection) -> Self {
        UploadError::Validation(format!("Invalid upload request: {}", rejection.body_text()))
    }
}

fn malformed(err: MultipartError) -> UploadError {
    UploadError::Validation(format!("Malformed upload: {}", err.body_text()))
}

/// Receives, stores and validates every file of a request. Nothing stays
/// on disk unless the whole batch is accepted.
async fn accept_upload(
    gate: &UploadGate,
    headers: &HeaderMap,
    mut multipart: Multipart,
    configs: &[DocumentConfig],
) -> Result<Vec<StoredFile>, UploadError> {
    let user_id = headers
        .get(USER_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty());

    let mut files = Vec::new();
    if let Err(err) = receive_files(gate, user_id, &mut multipart, configs, &mut files).await {
        warn!(code = err.code(), error = %err, "upload rejected while receiving");
        gate.discard(&files).await;
        return Err(err);
    }

    gate.validate_batch(&files, configs).await?;
    Ok(files)
}

async fn receive_files(
    gate: &UploadGate,
    user_id: Option<&str>,
    multipart: &mut Multipart,
    configs: &[DocumentConfig],
    files: &mut Vec<StoredFile>,
) -> Result<(), UploadError> {
    let policy = gate.policy();
    let max_size = gate.file_size_limit(configs);

    while let Some(mut field) = multipart.next_field().await.map_err(malformed)? {
        let field_name = field.name().unwrap_or_default().to_string();
        let file_name = field.file_name().map(str::to_string);
        let Some(original_name) = file_name else {
            read_text_field(&mut field, &field_name, policy.field_size).await?;
            continue;
        };

        if files.len() >= policy.max_files {
            return Err(UploadError::TooManyFiles(policy.max_files));
        }

        let mime_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        gate.check_incoming(&original_name, &mime_type, configs)?;

        let meta = FileMeta {
            field_name,
            original_name,
            mime_type,
            size: 0,
        };
        files.push(gate.store_file(meta, user_id, field, max_size).await?);
    }

    Ok(())
}

/// Drains a non-file field, enforcing the field size limit.
async fn read_text_field(
    field: &mut Field<'_>,
    name: &str,
    limit: u64,
) -> Result<(), UploadError> {
    let mut total: u64 = 0;
    while let Some(chunk) = field.chunk().await.map_err(malformed)? {
        total += chunk.len() as u64;
        if total > limit {
            return Err(UploadError::Validation(format!(
                "Field {} exceeds the maximum size of {} bytes",
                name, limit
            )));
        }
    }
    Ok(())
}
