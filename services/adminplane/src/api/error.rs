//! API error envelope and constructors.
//!
//! # Purpose
//! Every handler failure leaves the service as `{code, message, request_id}`
//! with a status matching the code. Storage and service errors are translated
//! here so handlers stay one-liners.
//!
//! # Security considerations
//! - Internal errors are logged with detail server-side and returned with a
//!   generic message.
use crate::api::types::ErrorResponse;
use crate::service::{MenuError, RoleError};
use crate::store::StoreError;
use axum::Json;
use axum::http::StatusCode;
use axum::response::IntoResponse;

/// Status plus JSON body; implements `IntoResponse`.
///
/// # Example
/// ```rust
/// use adminplane::api::error::api_not_found;
/// use axum::http::StatusCode;
///
/// let err = api_not_found("role 7 not found");
/// assert_eq!(err.status, StatusCode::NOT_FOUND);
/// assert_eq!(err.body.code, "not_found");
/// ```
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: ErrorResponse,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        (self.status, Json(self.body)).into_response()
    }
}

fn api_error(status: StatusCode, code: &str, message: &str) -> ApiError {
    ApiError {
        status,
        body: ErrorResponse {
            code: code.to_string(),
            message: message.to_string(),
            request_id: None,
        },
    }
}

pub fn api_not_found(message: &str) -> ApiError {
    api_error(StatusCode::NOT_FOUND, "not_found", message)
}

/// 409 with a caller-chosen code such as `already_exists`.
pub fn api_conflict(code: &str, message: &str) -> ApiError {
    api_error(StatusCode::CONFLICT, code, message)
}

/// 500 for a storage failure; the error itself is only logged.
pub fn api_internal(message: &str, err: &StoreError) -> ApiError {
    tracing::error!(error = ?err, "adminplane storage error");
    api_error(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
}

pub fn api_internal_message(message: &str) -> ApiError {
    api_error(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
}

pub fn api_unauthorized(message: &str) -> ApiError {
    api_error(StatusCode::UNAUTHORIZED, "unauthorized", message)
}

pub fn api_forbidden(message: &str) -> ApiError {
    api_error(StatusCode::FORBIDDEN, "forbidden", message)
}

pub fn api_validation_error(message: &str) -> ApiError {
    api_error(StatusCode::BAD_REQUEST, "validation_error", message)
}

/// Translate a role-service failure.
///
/// Validation messages are returned verbatim; storage failures become a
/// generic 500 carrying only the operation context.
pub fn api_from_role_error(err: RoleError) -> ApiError {
    match err {
        RoleError::Validation(message) => api_validation_error(&message),
        RoleError::Duplicate(name) => {
            api_conflict("already_exists", &format!("role {name} already exists"))
        }
        RoleError::NotFound(message) => api_not_found(&message),
        RoleError::Forbidden(message) => api_forbidden(&message),
        RoleError::Storage { context, source } => api_internal(context, &source),
    }
}

pub fn api_from_menu_error(err: MenuError) -> ApiError {
    match err {
        MenuError::Validation(message) => api_validation_error(&message),
        MenuError::Duplicate(number) => {
            api_conflict("already_exists", &format!("menu {number} already exists"))
        }
        MenuError::NotFound(message) => api_not_found(&message),
        MenuError::Storage { context, source } => api_internal(context, &source),
    }
}
