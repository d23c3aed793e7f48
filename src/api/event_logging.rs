//! `POST /api/event_logging/batch`.
//!
//! Clients (notably Kiro IDE itself) post usage telemetry batches here.
//! This gateway has no analytics pipeline to forward them to; it accepts
//! and discards them so clients that assume the endpoint exists don't see
//! request failures.

use axum::http::StatusCode;
use serde_json::Value;

pub async fn handle_event_logging_batch(body: axum::body::Bytes) -> StatusCode {
    if let Ok(value) = serde_json::from_slice::<Value>(&body) {
        let count = value
            .get("events")
            .and_then(Value::as_array)
            .map(Vec::len)
            .unwrap_or(0);
        tracing::debug!(event_count = count, "discarded event logging batch");
    }
    StatusCode::OK
}
