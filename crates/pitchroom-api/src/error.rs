use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use pitchroom_entitlements::{Denial, EngineError};
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// API-facing error taxonomy. Every denial carries a machine reason code so
/// the client can render the right remediation; store failures surface as
/// 500 with no retry inside this core.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error(transparent)]
    Denied(#[from] Denial),
    #[error("{0}")]
    Conflict(String),
    #[error("unauthorized")]
    Unauthorized,
    #[error("store unavailable")]
    Store(#[source] anyhow::Error),
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Store(e) => ApiError::Store(e),
            EngineError::UserNotFound => ApiError::NotFound("user"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, reason) = match &self {
            ApiError::Validation(_) => (StatusCode::BAD_REQUEST, None),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, None),
            ApiError::Denied(d) => (StatusCode::FORBIDDEN, Some(d.reason_code())),
            ApiError::Conflict(_) => (StatusCode::CONFLICT, None),
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, None),
            ApiError::Store(e) => {
                error!("store failure: {e:#}");
                (StatusCode::INTERNAL_SERVER_ERROR, None)
            }
        };

        let mut body = json!({ "error": self.to_string() });
        if let Some(reason) = reason {
            body["reason"] = reason.into();
        }
        (status, Json(body)).into_response()
    }
}
