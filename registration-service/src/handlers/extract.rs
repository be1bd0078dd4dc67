//! Extractors that report malformed input through the error envelope.

use axum::{
    async_trait,
    extract::{FromRequest, FromRequestParts, Query, Request},
    http::request::Parts,
    Json,
};
use serde::de::DeserializeOwned;
use validator::Validate;

use crate::dtos::validation::field_errors;
use crate::error::RegistrationError;

/// JSON body whose rejection becomes a `VALIDATION_FAILED` response.
pub struct JsonBody<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for JsonBody<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = RegistrationError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|e| RegistrationError::validation("body", &e.body_text()))?;
        Ok(JsonBody(value))
    }
}

/// Query string deserialized and checked with `validator`. Errors carry the
/// query parameter names.
pub struct ValidatedQuery<T>(pub T);

#[async_trait]
impl<T, S> FromRequestParts<S> for ValidatedQuery<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
{
    type Rejection = RegistrationError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(value) = Query::<T>::from_request_parts(parts, state)
            .await
            .map_err(|e| RegistrationError::validation("query", &e.body_text()))?;
        value
            .validate()
            .map_err(|e| RegistrationError::ValidationFailed(field_errors(&e)))?;
        Ok(ValidatedQuery(value))
    }
}
