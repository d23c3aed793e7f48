//! `POST /v1/messages/count_tokens`.
//!
//! Estimates input token count without an upstream round trip, using the
//! same character-based heuristic the translator uses to size the
//! synthetic cache distribution for a streamed response.

use axum::extract::State;
use axum::Json;
use kiro_gateway::MessagesRequest;
use serde::Serialize;

use crate::error::Result;
use crate::orchestrator::validate_request;
use crate::AppState;

#[derive(Serialize)]
pub struct CountTokensResponse {
    input_tokens: u32,
}

/// Rough chars-per-token ratio used across the Anthropic ecosystem for
/// English-dominant prose; good enough for a pre-flight estimate.
const CHARS_PER_TOKEN: f64 = 4.0;

pub async fn handle_count_tokens(
    State(_state): State<AppState>,
    Json(request): Json<MessagesRequest>,
) -> Result<Json<CountTokensResponse>> {
    validate_request(&request)?;

    let mut chars = 0usize;
    if let Some(system) = &request.system {
        chars += system.text().len();
    }
    for message in &request.messages {
        chars += message.content.text().len();
    }

    let input_tokens = ((chars as f64) / CHARS_PER_TOKEN).ceil() as u32;
    Ok(Json(CountTokensResponse { input_tokens }))
}
