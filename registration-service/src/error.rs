//! Error types for registration-service.
//!
//! Each collaborator has its own error enum; the service layer folds them
//! into [`RegistrationError`], which is what handlers return.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use service_core::error::AppError;
use service_core::response::{ErrorBody, FieldError};
use thiserror::Error;

use crate::models::{FileKind, RegistrationStatus, TransactionStatus};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("email is already used by an active registration")]
    EmailTaken,

    #[error("order id already exists")]
    OrderIdTaken,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("{0}")]
    Other(anyhow::Error),
}

impl StoreError {
    /// Classify a write failure, turning unique violations into typed errors.
    pub fn from_write(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(ref db_err) = err {
            if db_err.is_unique_violation() {
                return match db_err.constraint() {
                    Some("uq_registrations_active_email") => StoreError::EmailTaken,
                    Some("payments_order_id_key") => StoreError::OrderIdTaken,
                    _ => StoreError::Database(err),
                };
            }
        }
        StoreError::Database(err)
    }
}

#[derive(Debug, Error)]
pub enum FileStoreError {
    #[error("file exceeds the {limit} byte limit")]
    TooLarge { limit: u64 },

    #[error("{kind} upload must be {expected}, got {actual}")]
    Rejected {
        kind: FileKind,
        expected: &'static str,
        actual: String,
    },

    #[error("upload is empty")]
    Empty,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum OracleError {
    #[error("currency oracle transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("currency oracle returned status {0}")]
    Status(u16),

    #[error("currency oracle response could not be used: {0}")]
    Parse(String),
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("payment gateway transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("payment gateway returned status {status}: {message}")]
    Api { status: u16, message: String },

    #[error("order not found at the payment gateway")]
    OrderNotFound,

    #[error("order is in a state that does not allow this operation")]
    InvalidState,

    #[error("payment gateway response could not be used: {0}")]
    Parse(String),
}

/// Errors surfaced by registration and payment operations.
#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("Validation failed")]
    ValidationFailed(Vec<FieldError>),

    #[error("{0} not found")]
    NotFound(String),

    #[error("Email is already registered")]
    EmailAlreadyRegistered,

    #[error("File {0} not found")]
    FileNotFound(i64),

    #[error("File {file_id} is not {expected}")]
    FileKindMismatch {
        file_id: i64,
        expected: &'static str,
    },

    #[error("{kind} upload must be {expected}, got {actual}")]
    UploadKindMismatch {
        kind: FileKind,
        expected: &'static str,
        actual: String,
    },

    #[error("File exceeds the {limit} byte limit")]
    FileTooLarge { limit: u64 },

    #[error("File {0} is referenced by a registration")]
    FileInUse(i64),

    #[error("Currency conversion is unavailable")]
    OracleUnavailable(#[source] OracleError),

    #[error("Payment gateway is unavailable")]
    GatewayUnavailable(#[source] GatewayError),

    #[error("Signature verification failed")]
    SignatureMismatch,

    #[error("Order {0} not found")]
    OrderNotFound(String),

    #[error("Order is {0} and cannot be changed")]
    InvalidState(TransactionStatus),

    #[error("Cannot change status from {from} to {to}")]
    InvalidTransition {
        from: RegistrationStatus,
        to: RegistrationStatus,
    },

    #[error("Internal error: {0}")]
    Internal(anyhow::Error),
}

impl RegistrationError {
    pub fn validation(field: &str, message: &str) -> Self {
        RegistrationError::ValidationFailed(vec![FieldError::new(field, message)])
    }

    pub fn status(&self) -> StatusCode {
        match self {
            RegistrationError::ValidationFailed(_)
            | RegistrationError::FileNotFound(_)
            | RegistrationError::FileKindMismatch { .. }
            | RegistrationError::UploadKindMismatch { .. }
            | RegistrationError::FileTooLarge { .. } => StatusCode::BAD_REQUEST,
            RegistrationError::NotFound(_) | RegistrationError::OrderNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            RegistrationError::EmailAlreadyRegistered
            | RegistrationError::FileInUse(_)
            | RegistrationError::InvalidState(_)
            | RegistrationError::InvalidTransition { .. } => StatusCode::CONFLICT,
            RegistrationError::OracleUnavailable(_) | RegistrationError::GatewayUnavailable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            RegistrationError::SignatureMismatch => StatusCode::UNAUTHORIZED,
            RegistrationError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            RegistrationError::ValidationFailed(_) => "VALIDATION_FAILED",
            RegistrationError::NotFound(_) => "NOT_FOUND",
            RegistrationError::EmailAlreadyRegistered => "EMAIL_ALREADY_REGISTERED",
            RegistrationError::FileNotFound(_) => "FILE_NOT_FOUND",
            RegistrationError::FileKindMismatch { .. }
            | RegistrationError::UploadKindMismatch { .. } => "FILE_KIND_MISMATCH",
            RegistrationError::FileTooLarge { .. } => "FILE_TOO_LARGE",
            RegistrationError::FileInUse(_) => "FILE_IN_USE",
            RegistrationError::OracleUnavailable(_) => "ORACLE_UNAVAILABLE",
            RegistrationError::GatewayUnavailable(_) => "GATEWAY_UNAVAILABLE",
            RegistrationError::SignatureMismatch => "SIGNATURE_MISMATCH",
            RegistrationError::OrderNotFound(_) => "ORDER_NOT_FOUND",
            RegistrationError::InvalidState(_) => "INVALID_STATE",
            RegistrationError::InvalidTransition { .. } => "INVALID_TRANSITION",
            RegistrationError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<StoreError> for RegistrationError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::EmailTaken => RegistrationError::EmailAlreadyRegistered,
            other => RegistrationError::Internal(anyhow::Error::new(other)),
        }
    }
}

impl From<FileStoreError> for RegistrationError {
    fn from(err: FileStoreError) -> Self {
        match err {
            FileStoreError::TooLarge { limit } => RegistrationError::FileTooLarge { limit },
            FileStoreError::Rejected { kind, expected, actual } => {
                RegistrationError::UploadKindMismatch { kind, expected, actual }
            }
            FileStoreError::Empty => RegistrationError::validation("file", "File is empty"),
            other => RegistrationError::Internal(anyhow::Error::new(other)),
        }
    }
}

impl From<OracleError> for RegistrationError {
    fn from(err: OracleError) -> Self {
        RegistrationError::OracleUnavailable(err)
    }
}

impl From<GatewayError> for RegistrationError {
    fn from(err: GatewayError) -> Self {
        RegistrationError::GatewayUnavailable(err)
    }
}

impl From<RegistrationError> for AppError {
    fn from(err: RegistrationError) -> Self {
        let message = err.to_string();
        match err {
            RegistrationError::ValidationFailed(errors) => AppError::ValidationFailed(errors),
            RegistrationError::NotFound(_) | RegistrationError::OrderNotFound(_) => {
                AppError::NotFound(anyhow::anyhow!(message))
            }
            RegistrationError::EmailAlreadyRegistered
            | RegistrationError::FileInUse(_)
            | RegistrationError::InvalidState(_)
            | RegistrationError::InvalidTransition { .. } => {
                AppError::Conflict(anyhow::anyhow!(message))
            }
            RegistrationError::FileNotFound(_)
            | RegistrationError::FileKindMismatch { .. }
            | RegistrationError::UploadKindMismatch { .. }
            | RegistrationError::FileTooLarge { .. } => AppError::BadRequest(anyhow::anyhow!(message)),
            RegistrationError::OracleUnavailable(_) | RegistrationError::GatewayUnavailable(_) => {
                AppError::ServiceUnavailable(anyhow::anyhow!(message))
            }
            RegistrationError::SignatureMismatch => AppError::Unauthorized(anyhow::anyhow!(message)),
            RegistrationError::Internal(e) => AppError::InternalError(e),
        }
    }
}

impl IntoResponse for RegistrationError {
    fn into_response(self) -> Response {
        let status = self.status();
        let kind = self.kind();

        match self {
            RegistrationError::ValidationFailed(errors) => {
                ErrorBody::new(kind, "Validation failed")
                    .with_errors(errors)
                    .into_response_with(status)
            }
            RegistrationError::OracleUnavailable(ref source) => {
                tracing::warn!(error = %source, "Currency oracle unavailable");
                ErrorBody::new(kind, self.to_string()).into_response_with(status)
            }
            RegistrationError::GatewayUnavailable(ref source) => {
                tracing::warn!(error = %source, "Payment gateway unavailable");
                ErrorBody::new(kind, self.to_string()).into_response_with(status)
            }
            RegistrationError::Internal(_) => AppError::from(self).into_response(),
            other => ErrorBody::new(kind, other.to_string()).into_response_with(status),
        }
    }
}
