//! `GET /health`.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::AppState;

#[derive(Serialize)]
struct AccountsStatus {
    total: usize,
    healthy: usize,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    redis: &'static str,
    accounts: AccountsStatus,
}

pub async fn handle_health(State(state): State<AppState>) -> Response {
    let mut conn = state.redis.clone();
    let redis_ok = redis::cmd("PING")
        .query_async::<_, String>(&mut conn)
        .await
        .is_ok();

    let accounts = state.selector.health_snapshot().await.ok();
    let (total, healthy) = accounts.unwrap_or((0, 0));

    let degraded = !redis_ok || healthy == 0;
    let status = if degraded { "degraded" } else { "healthy" };
    let redis_status = if redis_ok { "connected" } else { "disconnected" };

    let body = HealthResponse {
        status,
        redis: redis_status,
        accounts: AccountsStatus { total, healthy },
    };

    let code = if degraded {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    (code, Json(body)).into_response()
}
