//! HTTP surface: the four routes this gateway exposes.

mod auth;
mod count_tokens;
mod event_logging;
mod health;
mod messages;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::AppState;

pub use auth::require_auth;

/// Assemble the full router: `/health` is unauthenticated, everything else
/// requires a valid API key.
pub fn build_app(state: AppState) -> Router {
    let authenticated = Router::new()
        .route("/v1/messages", post(messages::handle_messages))
        .route(
            "/v1/messages/count_tokens",
            post(count_tokens::handle_count_tokens),
        )
        .route(
            "/api/event_logging/batch",
            post(event_logging::handle_event_logging_batch),
        )
        .layer(middleware::from_fn_with_state(state.clone(), require_auth));

    let public = Router::new().route("/health", get(health::handle_health));

    Router::new()
        .merge(public)
        .merge(authenticated)
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
