use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use domain::{ConfigError, ErrorKind};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),
}

/// Status code and error code for each domain error kind.
const KIND_STATUS: [(ErrorKind, StatusCode, &str); 6] = [
    (ErrorKind::NotFound, StatusCode::NOT_FOUND, "not_found"),
    (ErrorKind::Conflict, StatusCode::CONFLICT, "conflict"),
    (ErrorKind::Validation, StatusCode::BAD_REQUEST, "validation_error"),
    (
        ErrorKind::RollbackIneligible,
        StatusCode::UNPROCESSABLE_ENTITY,
        "rollback_ineligible",
    ),
    (ErrorKind::Forbidden, StatusCode::FORBIDDEN, "forbidden"),
    (ErrorKind::Storage, StatusCode::INTERNAL_SERVER_ERROR, "storage_error"),
];

pub fn status_for(kind: ErrorKind) -> (StatusCode, &'static str) {
    KIND_STATUS
        .iter()
        .find(|(k, _, _)| *k == kind)
        .map(|(_, status, code)| (*status, *code))
        .unwrap_or((StatusCode::INTERNAL_SERVER_ERROR, "internal_error"))
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Vec<ValidationDetail>>,
}

#[derive(Debug, Serialize)]
pub struct ValidationDetail {
    pub field: String,
    pub message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut details = None;
        let (status, error_code, message) = match &self {
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "unauthorized", msg.clone()),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.clone()),
            ApiError::Config(err) => {
                let (status, code) = status_for(err.kind());
                let fields = err.field_errors();
                if !fields.is_empty() {
                    details = Some(
                        fields
                            .iter()
                            .map(|f| ValidationDetail {
                                field: f.path.clone(),
                                message: f.message.clone(),
                            })
                            .collect(),
                    );
                }
                let message = if status.is_server_error() {
                    tracing::error!(error = %err, "Storage failure");
                    "An internal error occurred".to_string()
                } else {
                    err.to_string()
                };
                (status, code, message)
            }
            ApiError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".into(),
                )
            }
            ApiError::ServiceUnavailable(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "service_unavailable",
                msg.clone(),
            ),
        };

        let body = ErrorBody {
            error: error_code.into(),
            message,
            details,
        };

        (status, Json(body)).into_response()
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(errors: validator::ValidationErrors) -> Self {
        ApiError::Config(errors.into())
    }
}
