use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;

use crate::error::ApiError;
use crate::AppState;

/// Bearer-token gate for every `/v2/*` route.
pub async fn require_bearer(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let header = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::Unauthorized("Missing bearer token"))?;

    let (scheme, token) = header
        .split_once(' ')
        .ok_or(ApiError::Unauthorized("Invalid authorization header"))?;

    if !scheme.eq_ignore_ascii_case("bearer") || token != state.bearer_token {
        return Err(ApiError::Unauthorized("Invalid bearer token"));
    }

    Ok(next.run(req).await)
}
