use axum::{
    extract::{multipart::MultipartError, Multipart, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use service_core::response::ApiResponse;

use super::extract::ValidatedQuery;
use crate::dtos::{FileDeleteResponse, FileListQuery, FileView};
use crate::error::RegistrationError;
use crate::models::{CleanupReport, FileKind, FileStatistics, NewUpload, Page};
use crate::startup::AppState;

/// Multipart field carrying the upload.
const FILE_FIELD: &str = "file";

fn multipart_error(limit: u64) -> impl Fn(MultipartError) -> RegistrationError {
    move |e| {
        if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            RegistrationError::FileTooLarge { limit }
        } else {
            RegistrationError::validation(FILE_FIELD, &e.body_text())
        }
    }
}

async fn read_upload(mut multipart: Multipart, limit: u64) -> Result<NewUpload, RegistrationError> {
    while let Some(field) = multipart.next_field().await.map_err(multipart_error(limit))? {
        if field.name() != Some(FILE_FIELD) && field.file_name().is_none() {
            continue;
        }
        let original_name = field.file_name().unwrap_or("upload").to_string();
        let declared_mime = field.content_type().map(str::to_string);
        let bytes = field.bytes().await.map_err(multipart_error(limit))?;
        return Ok(NewUpload {
            original_name,
            declared_mime,
            bytes: bytes.to_vec(),
        });
    }
    Err(RegistrationError::validation(FILE_FIELD, "file is required"))
}

async fn store(
    state: &AppState,
    multipart: Multipart,
    kind: FileKind,
) -> Result<ApiResponse<FileView>, RegistrationError> {
    let upload = read_upload(multipart, state.config.storage.max_upload_bytes).await?;
    let record = state.files.put(upload, kind).await?;
    Ok(ApiResponse::created(
        "File uploaded",
        FileView::new(&record, &state.urls),
    ))
}

pub async fn upload_essay(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<ApiResponse<FileView>, RegistrationError> {
    store(&state, multipart, FileKind::Essay).await
}

pub async fn upload_headshot(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<ApiResponse<FileView>, RegistrationError> {
    store(&state, multipart, FileKind::Headshot).await
}

pub async fn upload_payment_proof(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<ApiResponse<FileView>, RegistrationError> {
    store(&state, multipart, FileKind::PaymentProof).await
}

pub async fn download(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Response, RegistrationError> {
    let (record, bytes) = state
        .files
        .read(id)
        .await?
        .ok_or_else(|| RegistrationError::NotFound("File".into()))?;

    let filename = record.original_name.replace(['"', '\\'], "_");
    Ok((
        [
            (header::CONTENT_TYPE, record.mime_type),
            (
                header::CONTENT_DISPOSITION,
                format!("inline; filename=\"{filename}\""),
            ),
        ],
        bytes,
    )
        .into_response())
}

pub async fn info(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<ApiResponse<FileView>, RegistrationError> {
    let record = state
        .files
        .get(id)
        .await?
        .ok_or_else(|| RegistrationError::NotFound("File".into()))?;
    Ok(ApiResponse::ok(
        "File retrieved",
        FileView::new(&record, &state.urls),
    ))
}

/// Files still referenced by a registration cannot be deleted.
pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<ApiResponse<FileDeleteResponse>, RegistrationError> {
    if state.store.file_reference_count(id).await? > 0 {
        return Err(RegistrationError::FileInUse(id));
    }
    if !state.files.delete(id).await? {
        return Err(RegistrationError::NotFound("File".into()));
    }
    Ok(ApiResponse::ok(
        "File deleted",
        FileDeleteResponse { id, deleted: true },
    ))
}

pub async fn list(
    State(state): State<AppState>,
    ValidatedQuery(query): ValidatedQuery<FileListQuery>,
) -> Result<ApiResponse<Page<FileView>>, RegistrationError> {
    let (kind, paging) = query.parse().map_err(RegistrationError::ValidationFailed)?;
    let page = state.files.list_by_kind(kind, paging).await?;
    Ok(ApiResponse::ok(
        "Files retrieved",
        page.map(|record| FileView::new(&record, &state.urls)),
    ))
}

pub async fn statistics(
    State(state): State<AppState>,
) -> Result<ApiResponse<FileStatistics>, RegistrationError> {
    let stats = state.files.statistics().await?;
    Ok(ApiResponse::ok("File statistics", stats))
}

pub async fn cleanup(
    State(state): State<AppState>,
) -> Result<ApiResponse<CleanupReport>, RegistrationError> {
    let report = state.files.cleanup_orphans().await?;
    Ok(ApiResponse::ok("Orphaned files removed", report))
}
