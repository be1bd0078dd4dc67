use axum::{
    extract::{Path, State},
    http::header,
    response::{IntoResponse, Response},
};
use chrono::{NaiveDate, Utc};
use service_core::response::ApiResponse;

use super::extract::{JsonBody, ValidatedQuery};
use crate::dtos::{
    DeleteResponse, EmailCheckResponse, FullyFundedRequest, RegistrationQuery, RegistrationView,
    SelfFundedRequest, SubmissionResult, UpdateStatusRequest,
};
use crate::error::RegistrationError;
use crate::models::{Page, Paging, Registration};
use crate::services::repository::RegistrationStats;
use crate::startup::AppState;

const XLSX_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

pub async fn submit_fully_funded(
    State(state): State<AppState>,
    JsonBody(request): JsonBody<FullyFundedRequest>,
) -> Result<ApiResponse<SubmissionResult>, RegistrationError> {
    let application = request
        .into_application(today())
        .map_err(RegistrationError::ValidationFailed)?;
    let detail = state.service.submit_fully_funded(application).await?;
    Ok(ApiResponse::created(
        "Fully funded registration created",
        SubmissionResult::new(&detail, &state.urls),
    ))
}

pub async fn submit_self_funded(
    State(state): State<AppState>,
    JsonBody(request): JsonBody<SelfFundedRequest>,
) -> Result<ApiResponse<SubmissionResult>, RegistrationError> {
    let application = request
        .into_application(today())
        .map_err(RegistrationError::ValidationFailed)?;
    let detail = state.service.submit_self_funded(application).await?;
    Ok(ApiResponse::created(
        "Self funded registration created",
        SubmissionResult::new(&detail, &state.urls),
    ))
}

pub async fn list_registrations(
    State(state): State<AppState>,
    ValidatedQuery(query): ValidatedQuery<RegistrationQuery>,
) -> Result<ApiResponse<Page<Registration>>, RegistrationError> {
    let filter = query.filter().map_err(RegistrationError::ValidationFailed)?;
    let sort = query.sort().map_err(RegistrationError::ValidationFailed)?;
    let page = state
        .service
        .list(&filter, sort, Paging::new(query.page, query.per_page))
        .await?;
    Ok(ApiResponse::ok("Registrations retrieved", page))
}

pub async fn get_registration(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<ApiResponse<RegistrationView>, RegistrationError> {
    let detail = state.service.get_by_id(id).await?;
    Ok(ApiResponse::ok(
        "Registration retrieved",
        RegistrationView::new(&detail, &state.urls),
    ))
}

pub async fn get_by_submission_id(
    State(state): State<AppState>,
    Path(submission_id): Path<String>,
) -> Result<ApiResponse<RegistrationView>, RegistrationError> {
    let detail = state.service.get_by_submission_id(&submission_id).await?;
    Ok(ApiResponse::ok(
        "Registration retrieved",
        RegistrationView::new(&detail, &state.urls),
    ))
}

pub async fn update_status(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    JsonBody(request): JsonBody<UpdateStatusRequest>,
) -> Result<ApiResponse<RegistrationView>, RegistrationError> {
    let status = request.parse().map_err(RegistrationError::ValidationFailed)?;
    let detail = state.service.update_status(id, status).await?;
    Ok(ApiResponse::ok(
        "Registration status updated",
        RegistrationView::new(&detail, &state.urls),
    ))
}

pub async fn delete_registration(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<ApiResponse<DeleteResponse>, RegistrationError> {
    let outcome = state.service.delete(id).await?;
    Ok(ApiResponse::ok(
        "Registration deleted",
        DeleteResponse {
            id,
            deleted: outcome.deleted,
            deleted_files: outcome.deleted_files,
        },
    ))
}

pub async fn statistics(
    State(state): State<AppState>,
) -> Result<ApiResponse<RegistrationStats>, RegistrationError> {
    let stats = state.service.statistics().await?;
    Ok(ApiResponse::ok("Registration statistics", stats))
}

pub async fn date_range(
    State(state): State<AppState>,
    ValidatedQuery(query): ValidatedQuery<RegistrationQuery>,
) -> Result<ApiResponse<Vec<RegistrationView>>, RegistrationError> {
    query
        .require_range()
        .map_err(RegistrationError::ValidationFailed)?;
    let filter = query.filter().map_err(RegistrationError::ValidationFailed)?;
    let details = state.service.by_date_range(&filter).await?;
    let views = details
        .iter()
        .map(|d| RegistrationView::new(d, &state.urls))
        .collect();
    Ok(ApiResponse::ok("Registrations retrieved", views))
}

pub async fn check_email(
    State(state): State<AppState>,
    Path(email): Path<String>,
) -> Result<ApiResponse<EmailCheckResponse>, RegistrationError> {
    let exists = state.service.check_email_exists(&email).await?;
    Ok(ApiResponse::ok(
        if exists {
            "Email is already registered"
        } else {
            "Email is available"
        },
        EmailCheckResponse {
            email: email.trim().to_lowercase(),
            exists,
        },
    ))
}

pub async fn export(
    State(state): State<AppState>,
    ValidatedQuery(query): ValidatedQuery<RegistrationQuery>,
) -> Result<Response, RegistrationError> {
    let filter = query.filter().map_err(RegistrationError::ValidationFailed)?;
    let bytes = state.service.export_all(&filter).await?;
    let disposition = format!(
        "attachment; filename=\"registrations-{}.xlsx\"",
        Utc::now().format("%Y%m%d-%H%M%S")
    );
    Ok((
        [
            (header::CONTENT_TYPE, XLSX_CONTENT_TYPE.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response())
}
