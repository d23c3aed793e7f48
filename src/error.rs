//! HTTP-boundary error type.
//!
//! Every error that can reach a client is rendered as the Anthropic-style
//! envelope `{"type": "error", "error": {"type": ..., "message": ...}}`,
//! never the OpenAI-shaped `{error: {message, type, code}}` used elsewhere
//! in this lineage.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// Top-level errors that can surface from the HTTP boundary.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Request failed Anthropic Messages API validation before any upstream call.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Missing or incorrect `x-api-key` / `Authorization` header.
    #[error("authentication failed")]
    Unauthorized,

    /// No healthy account was available to serve the request.
    #[error("no healthy accounts available")]
    NoHealthyAccounts,

    /// Upstream reported the request's context exceeds the model's window.
    #[error("context window exceeded")]
    ContextTooLong,

    /// Upstream (or every account tried) is overloaded.
    #[error("overloaded")]
    Overloaded,

    /// Upstream returned a status this gateway does not retry or translate;
    /// propagated with the original status, body, and the accounts tried.
    #[error("upstream error {status}: {body}")]
    Upstream {
        status: u16,
        body: String,
        attempted_accounts: Vec<uuid::Uuid>,
    },

    /// Infrastructure failure (Redis unreachable, serialization failure, etc).
    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::Unauthorized => StatusCode::UNAUTHORIZED,
            GatewayError::NoHealthyAccounts => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::ContextTooLong => StatusCode::BAD_REQUEST,
            GatewayError::Overloaded => StatusCode::from_u16(529).unwrap_or(StatusCode::SERVICE_UNAVAILABLE),
            GatewayError::Upstream { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_type(&self) -> &'static str {
        match self {
            GatewayError::InvalidRequest(_) => "invalid_request_error",
            GatewayError::Unauthorized => "authentication_error",
            GatewayError::NoHealthyAccounts => "api_error",
            GatewayError::ContextTooLong => "overloaded_error",
            GatewayError::Overloaded => "overloaded_error",
            GatewayError::Upstream { .. } => "api_error",
            GatewayError::Internal(_) => "api_error",
        }
    }

    fn client_message(&self) -> String {
        match self {
            GatewayError::ContextTooLong => {
                "Request exceeds the model's context window. Try compacting earlier turns or \
                 reducing attached content."
                    .to_string()
            }
            GatewayError::Upstream { body, attempted_accounts, .. } => {
                format!(
                    "{body} (tried {} account(s))",
                    attempted_accounts.len()
                )
            }
            other => other.to_string(),
        }
    }
}

#[derive(Serialize)]
struct ErrorEnvelope<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    error: ErrorDetail<'a>,
}

#[derive(Serialize)]
struct ErrorDetail<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    message: std::borrow::Cow<'a, str>,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_type = self.error_type();
        let message = self.client_message();

        tracing::warn!(status = status.as_u16(), error_type, %message, "request failed");

        let body = ErrorEnvelope {
            kind: "error",
            error: ErrorDetail {
                kind: error_type,
                message: std::borrow::Cow::Owned(message),
            },
        };
        (status, Json(body)).into_response()
    }
}

impl From<anyhow::Error> for GatewayError {
    fn from(e: anyhow::Error) -> Self {
        GatewayError::Internal(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;
