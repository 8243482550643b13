use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use cinebook_core::LockError;
use serde_json::json;

#[derive(Debug)]
pub enum AppError {
    AuthorizationError(String),
    ValidationError(String),
    NotFoundError(String),
    ConflictError(String),
    InternalServerError(String),
}

impl AppError {
    fn kind(&self) -> &'static str {
        match self {
            AppError::AuthorizationError(_) => "forbidden",
            AppError::ValidationError(_) => "validation_error",
            AppError::NotFoundError(_) => "not_found",
            AppError::ConflictError(_) => "conflict",
            AppError::InternalServerError(_) => "internal_error",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let kind = self.kind();
        let (status, message) = match self {
            AppError::AuthorizationError(msg) => (StatusCode::FORBIDDEN, msg),
            AppError::ValidationError(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFoundError(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::ConflictError(msg) => (StatusCode::CONFLICT, msg),
            AppError::InternalServerError(msg) => {
                tracing::error!("Internal Server Error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error".to_string())
            }
        };

        let body = Json(json!({
            "success": false,
            "error": kind,
            "message": message,
        }));

        (status, body).into_response()
    }
}

impl From<LockError> for AppError {
    fn from(err: LockError) -> Self {
        let message = err.to_string();
        match err {
            LockError::Validation(msg) => AppError::ValidationError(msg),
            LockError::Conflict { .. } => AppError::ConflictError(message),
            LockError::Forbidden(_) => AppError::AuthorizationError(message),
            LockError::Store(msg) => AppError::InternalServerError(msg),
        }
    }
}
