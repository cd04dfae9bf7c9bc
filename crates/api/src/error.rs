use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use tracing::warn;

/// Caller-visible error mapping: validation 400, auth 401, unknown id 404,
/// database trouble 503.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized(&'static str),
    NotFound(&'static str),
    Unavailable,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match self {
            ApiError::BadRequest(detail) => (StatusCode::BAD_REQUEST, detail),
            ApiError::Unauthorized(detail) => (StatusCode::UNAUTHORIZED, detail.to_string()),
            ApiError::NotFound(detail) => (StatusCode::NOT_FOUND, detail.to_string()),
            ApiError::Unavailable => (
                StatusCode::SERVICE_UNAVAILABLE,
                "Database unavailable".to_string(),
            ),
        };
        (status, Json(serde_json::json!({ "detail": detail }))).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        warn!(error = %e, "storage failure");
        ApiError::Unavailable
    }
}
