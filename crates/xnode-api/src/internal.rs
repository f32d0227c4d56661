//! Loopback-only endpoints for sidecar processes.

use axum::extract::State;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use serde_json::Value;

use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/get-config", get(handle_get_config))
}

/// Raw live configuration, deliberately not wrapped in the response
/// envelope: consumers feed it straight back into engine tooling.
async fn handle_get_config(State(state): State<AppState>) -> Response {
    let config: Value = state.config.engine_config();
    Json(config).into_response()
}
