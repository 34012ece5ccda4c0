//! HTTP error mapping

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

use agora_registry::RegistryError;

/// JSON error body returned by every failing route.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// HTTP-aligned error code
    pub code: u16,
    /// Human-readable message
    pub message: String,
}

impl ErrorResponse {
    /// Create a new error response.
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl From<&RegistryError> for ErrorResponse {
    fn from(err: &RegistryError) -> Self {
        let code = match err {
            RegistryError::Validation { .. } => 400,
            RegistryError::NotFound { .. } => 404,
            RegistryError::Conflict { .. } => 409,
            RegistryError::Unavailable { .. } => 503,
            RegistryError::Serialization(_) => 400,
        };
        ErrorResponse::new(code, err.to_string())
    }
}

/// Wrapper so handlers can use `?` on registry errors.
pub struct ApiError(pub RegistryError);

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorResponse::from(&self.0);
        let status =
            StatusCode::from_u16(body.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let body = ErrorResponse::from(&RegistryError::not_found("a1"));
        assert_eq!(body.code, 404);
        assert!(body.message.contains("a1"));

        let body = ErrorResponse::from(&RegistryError::validation("missing endpoint"));
        assert_eq!(body.code, 400);

        let body = ErrorResponse::from(&RegistryError::unavailable("backend down"));
        assert_eq!(body.code, 503);
    }
}
