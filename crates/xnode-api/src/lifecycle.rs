//! Engine lifecycle endpoints: start, stop, status, healthcheck.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Json, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info, warn};
use xnode_engine::config::prepare_config;
use xnode_sync::Internals;

use crate::metrics;
use crate::response::{ok, wrap};
use crate::state::AppState;
use crate::NODE_VERSION;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/start", post(handle_start))
        .route("/stop", get(handle_stop))
        .route("/status", get(handle_status))
        .route("/healthcheck", get(handle_healthcheck))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRequest {
    pub xray_config: Value,
    pub internals: Internals,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInfo {
    pub version: &'static str,
}

impl NodeInfo {
    fn current() -> Self {
        Self {
            version: NODE_VERSION,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemInfo {
    pub os: &'static str,
    pub arch: &'static str,
    pub num_cpu: usize,
}

impl SystemInfo {
    fn current() -> Self {
        Self {
            os: std::env::consts::OS,
            arch: std::env::consts::ARCH,
            num_cpu: std::thread::available_parallelism().map(usize::from).unwrap_or(1),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartResponse {
    pub is_started: bool,
    pub version: Option<String>,
    pub error: Option<String>,
    pub system_info: Option<SystemInfo>,
    pub node_info: NodeInfo,
}

impl StartResponse {
    fn started(version: String) -> Self {
        Self {
            is_started: true,
            version: Some(version),
            error: None,
            system_info: Some(SystemInfo::current()),
            node_info: NodeInfo::current(),
        }
    }

    fn failed(error: impl Into<String>) -> Self {
        Self {
            is_started: false,
            version: None,
            error: Some(error.into()),
            system_info: None,
            node_info: NodeInfo::current(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StopResponse {
    pub is_stopped: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub is_running: bool,
    pub version: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthcheckResponse {
    pub is_healthy: bool,
    pub is_xray_running: bool,
    pub xray_version: Option<String>,
    pub node_version: &'static str,
}

/// Clears the single-flight flag when the start body exits by any path.
struct ProcessingGuard(Arc<AtomicBool>);

impl Drop for ProcessingGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

async fn handle_start(
    State(state): State<AppState>,
    payload: Result<Json<StartRequest>, JsonRejection>,
) -> Response {
    if state
        .is_processing
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        warn!("start request already in progress, rejecting duplicate");
        metrics::record_start_conflict();
        return wrap(
            StatusCode::CONFLICT,
            StartResponse::failed("another start request is already in progress"),
        );
    }
    let _flag = ProcessingGuard(state.is_processing.clone());
    let _serial = state.start_lock.lock().await;

    let req = match payload {
        Ok(Json(req)) => req,
        Err(e) => {
            error!(error = %e, "failed to parse start request");
            return wrap(
                StatusCode::BAD_REQUEST,
                StartResponse::failed(format!("invalid request body: {e}")),
            );
        }
    };

    let hashes = req.internals.hashes;

    if state.engine.is_running() && !req.internals.force_restart {
        if !state.config.is_restart_needed(&hashes) {
            metrics::record_restart_skipped();
            return ok(StartResponse::started(state.engine.version()));
        }
        info!("restart required, proceeding with engine restart");
    }

    let config = prepare_config(&req.xray_config);

    if let Err(e) = state.config.extract_users(&hashes, &config) {
        error!(error = %e, "failed to extract users from configuration");
        return wrap(
            StatusCode::INTERNAL_SERVER_ERROR,
            StartResponse::failed(format!("failed to extract users: {e}")),
        );
    }

    if let Err(e) = state.engine.start(&config) {
        error!(error = %e, "failed to start engine");
        return wrap(
            StatusCode::INTERNAL_SERVER_ERROR,
            StartResponse::failed(format!("failed to start engine: {e}")),
        );
    }

    metrics::record_engine_restart();
    let version = state.engine.version();
    info!(version = %version, "engine started successfully");
    ok(StartResponse::started(version))
}

async fn handle_stop(State(state): State<AppState>) -> Response {
    let _serial = state.start_lock.lock().await;

    if let Err(e) = state.engine.stop() {
        error!(error = %e, "failed to stop engine");
        return wrap(
            StatusCode::INTERNAL_SERVER_ERROR,
            StopResponse { is_stopped: false },
        );
    }

    state.config.cleanup();
    info!("engine stopped and mirror cleaned up");
    ok(StopResponse { is_stopped: true })
}

async fn handle_status(State(state): State<AppState>) -> Response {
    let is_running = state.engine.is_running();
    ok(StatusResponse {
        is_running,
        version: is_running.then(|| state.engine.version()),
    })
}

async fn handle_healthcheck(State(state): State<AppState>) -> Response {
    let is_running = state.engine.is_running();
    ok(HealthcheckResponse {
        is_healthy: true,
        is_xray_running: is_running,
        xray_version: is_running.then(|| state.engine.version()),
        node_version: NODE_VERSION,
    })
}
