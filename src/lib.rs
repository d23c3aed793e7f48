//! Anthropic Messages API gateway that pools Kiro accounts behind a
//! Redis-backed account selector and retries failed requests across the
//! pool instead of surfacing every upstream hiccup to the client.

pub mod api;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod selector;

use std::sync::Arc;

use redis::aio::ConnectionManager;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::orchestrator::Orchestrator;
use crate::selector::AccountSelector;

/// Shared application state, cloned (cheaply, via `Arc`) into every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub selector: Arc<AccountSelector>,
    pub orchestrator: Arc<Orchestrator>,
    pub redis: ConnectionManager,
    /// Cancelled on graceful shutdown; every in-flight stream derives a
    /// child token so it can flush a clean SSE termination instead of
    /// being cut off mid-response.
    pub shutdown: CancellationToken,
}
