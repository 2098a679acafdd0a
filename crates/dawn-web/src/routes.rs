//! Route definitions and router construction.

use axum::Router;
use axum::routing::{get, post};

use crate::gateway::{auth_api, health, smartthings, static_files};
use crate::state::AppState;
use crate::ws;

/// Build the full router: API surface, WebSocket upgrade, health, OAuth
/// relay, and the static gateway as the fallback.
///
/// # Path Parameter Syntax
/// Axum 0.8 uses brace syntax for path parameters: `{id}`
#[must_use]
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/api/auth/status", get(auth_api::status))
        .route("/api/auth/csrf", get(auth_api::csrf))
        .route("/api/auth/login", post(auth_api::login))
        .route("/api/auth/logout", post(auth_api::logout))
        .route("/smartthings/callback", get(smartthings::callback))
        .route("/ws", get(ws::ws_upgrade))
        .fallback(static_files::serve)
        .with_state(state)
}
