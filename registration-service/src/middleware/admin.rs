use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use secrecy::ExposeSecret;
use service_core::response::ErrorBody;
use service_core::utils::digest::secret_eq;

use crate::startup::AppState;

pub const ADMIN_KEY_HEADER: &str = "X-Admin-Api-Key";

/// Gate admin routes on the shared admin API key.
pub async fn admin_auth_middleware(
    State(state): State<AppState>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Response {
    let api_key = headers
        .get(ADMIN_KEY_HEADER)
        .and_then(|value| value.to_str().ok());

    match api_key {
        Some(key) if secret_eq(state.config.admin.api_key.expose_secret(), key) => {
            next.run(request).await
        }
        _ => {
            tracing::warn!(path = %request.uri().path(), "Failed admin authentication attempt");
            ErrorBody::new("UNAUTHORIZED", "Invalid or missing admin API key")
                .into_response_with(StatusCode::UNAUTHORIZED)
        }
    }
}
