//! Health endpoint.

use axum::Json;
use axum::extract::State;
use serde_json::json;

use crate::state::AppState;

/// `GET /health`: small unauthenticated JSON snapshot.
pub async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "version": dawn_build_info::SEMVER,
        "git_sha": dawn_build_info::GIT_SHA_SHORT,
        "uptime_seconds": state.uptime_seconds(),
        "state": state.state().as_str(),
        "queries": state.query_count(),
        "active_sessions": state.sessions.active_count(),
    }))
}
