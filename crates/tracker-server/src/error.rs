//! HTTP error body and status mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::error;

use crate::auth::AuthError;
use crate::service::ServiceError;

/// Error categories exposed to HTTP clients.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidArgument,
    Unauthenticated,
    Forbidden,
    Unavailable,
    Internal,
}

impl ErrorCode {
    pub fn status(self) -> StatusCode {
        match self {
            Self::InvalidArgument => StatusCode::BAD_REQUEST,
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// `{"code", "message", "details"}` response.
#[derive(Clone, Debug, PartialEq, Serialize, thiserror::Error)]
#[error("{message}")]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<String>,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: Vec::new(),
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidArgument, message)
    }

    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unauthenticated, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Forbidden, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unavailable, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.details.push(detail.into());
        self
    }

    pub fn status(&self) -> StatusCode {
        self.code.status()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(self)).into_response()
    }
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        Self::unauthenticated(e.to_string())
    }
}

impl From<ServiceError> for ApiError {
    fn from(e: ServiceError) -> Self {
        match e {
            ServiceError::InvalidItem { index, source } => {
                let mut api = Self::invalid_argument(format!("Invalid JSON body for item {index}"));
                for detail in source.errors {
                    api = api.with_detail(format!("Item {index}: {detail}"));
                }
                api
            }
            ServiceError::ListFailed(ref source) | ServiceError::InsertFailed(ref source) => {
                error!(error = %source, "{e}");
                Self::internal(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracker_core::ValidationError;
    use tracker_store::StoreError;

    #[test]
    fn codes_map_to_status() {
        assert_eq!(ErrorCode::InvalidArgument.status(), StatusCode::BAD_REQUEST);
        assert_eq!(ErrorCode::Unauthenticated.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ErrorCode::Forbidden.status(), StatusCode::FORBIDDEN);
        assert_eq!(ErrorCode::Unavailable.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(ErrorCode::Internal.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn body_shape() {
        let err = ApiError::invalid_argument("bad").with_detail("lat");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"code": "invalid_argument", "message": "bad", "details": ["lat"]})
        );
    }

    #[test]
    fn details_omitted_when_empty() {
        let json = serde_json::to_value(ApiError::forbidden("nope")).unwrap();
        assert!(json.get("details").is_none());
    }

    #[test]
    fn auth_errors_are_unauthenticated() {
        let api: ApiError = AuthError::InvalidToken.into();
        assert_eq!(api.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(api.message, "Invalid token for device");
    }

    #[test]
    fn validation_failure_lists_item_details() {
        let api: ApiError = ServiceError::InvalidItem {
            index: 2,
            source: ValidationError {
                errors: vec!["latitude: cannot be blank".into()],
            },
        }
        .into();
        assert_eq!(api.message, "Invalid JSON body for item 2");
        assert_eq!(api.details, vec!["Item 2: latitude: cannot be blank"]);
    }

    #[test]
    fn store_failure_hides_cause() {
        let api: ApiError = ServiceError::InsertFailed(StoreError::Database("disk full".into())).into();
        assert_eq!(api.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(api.message, "Error inserting waypoints");
    }
}
