//! Bearer/`x-api-key` authentication middleware.

use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;

use crate::error::GatewayError;
use crate::AppState;

fn extract_key(headers: &HeaderMap) -> Option<String> {
    if let Some(value) = headers.get("x-api-key").and_then(|v| v.to_str().ok()) {
        return Some(value.to_string());
    }
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|s| s.to_string())
}

/// Validates the caller's API key against the configured one.
///
/// If no `API_KEY` is configured, auth is disabled - intended for local
/// development only.
pub async fn require_auth(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, GatewayError> {
    match &state.config.auth.api_key {
        None => Ok(next.run(request).await),
        Some(expected) => {
            let provided = extract_key(request.headers());
            match provided {
                Some(ref key) if key == expected => Ok(next.run(request).await),
                _ => Err(GatewayError::Unauthorized),
            }
        }
    }
}
