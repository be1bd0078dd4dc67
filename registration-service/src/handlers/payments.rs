use axum::extract::{Path, State};
use chrono::Utc;
use serde::Deserialize;
use service_core::response::ApiResponse;

use super::extract::JsonBody;
use crate::dtos::{CreateTransactionRequest, PaymentStatusView, SubmissionResult};
use crate::error::RegistrationError;
use crate::services::midtrans::WebhookNotification;
use crate::services::registration::CancelOutcome;
use crate::services::repository::PaymentStats;
use crate::services::webhook::WebhookOutcome;
use crate::startup::AppState;

/// Create a registration from the scholarship-agnostic payment form.
pub async fn create_transaction(
    State(state): State<AppState>,
    JsonBody(request): JsonBody<CreateTransactionRequest>,
) -> Result<ApiResponse<SubmissionResult>, RegistrationError> {
    let application = request
        .into_application(Utc::now().date_naive())
        .map_err(RegistrationError::ValidationFailed)?;
    let detail = state.service.submit(application).await?;
    Ok(ApiResponse::created(
        "Payment transaction created",
        SubmissionResult::new(&detail, &state.urls),
    ))
}

/// Gateway notification sink. Every processed notification is acknowledged
/// with 200 so the gateway stops retrying; only storage failures are not.
/// A JSON body missing notification fields is acknowledged as malformed.
pub async fn notification(
    State(state): State<AppState>,
    JsonBody(body): JsonBody<serde_json::Value>,
) -> Result<ApiResponse<WebhookOutcome>, RegistrationError> {
    let outcome = match WebhookNotification::deserialize(&body) {
        Ok(notification) => state.webhooks.process(&notification).await?,
        Err(e) => state.webhooks.malformed(&body, &e),
    };
    let message = if outcome.accepted {
        "Notification processed"
    } else {
        "Notification rejected"
    };
    Ok(ApiResponse::ok(message, outcome))
}

pub async fn payment_status(
    State(state): State<AppState>,
    Path(registration_id): Path<i64>,
) -> Result<ApiResponse<PaymentStatusView>, RegistrationError> {
    let detail = state.service.payment_status(registration_id).await?;
    Ok(ApiResponse::ok(
        "Payment status retrieved",
        PaymentStatusView::new(&detail, &state.urls),
    ))
}

pub async fn statistics(
    State(state): State<AppState>,
) -> Result<ApiResponse<PaymentStats>, RegistrationError> {
    let stats = state.service.payment_statistics().await?;
    Ok(ApiResponse::ok("Payment statistics", stats))
}

pub async fn cancel(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
) -> Result<ApiResponse<CancelOutcome>, RegistrationError> {
    let outcome = state.service.cancel_order(&order_id).await?;
    Ok(ApiResponse::ok("Order cancelled", outcome))
}
