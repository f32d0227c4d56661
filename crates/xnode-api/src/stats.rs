//! Traffic statistics endpoints backed by the engine's counter registry.
//!
//! Counter names follow the engine convention
//! `scope>>>name>>>traffic>>>direction`.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Json, State};
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use xnode_engine::StatsRegistry;

use crate::response::ok;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/get-system-stats", get(handle_system_stats))
        .route("/get-users-stats", post(handle_users_stats))
        .route("/get-user-online-status", post(handle_user_online_status))
        .route("/get-inbound-stats", post(handle_inbound_stats))
        .route("/get-outbound-stats", post(handle_outbound_stats))
        .route("/get-all-inbounds-stats", post(handle_all_inbounds_stats))
        .route("/get-all-outbounds-stats", post(handle_all_outbounds_stats))
        .route("/get-combined-stats", post(handle_combined_stats))
}

#[derive(Debug, Default, Deserialize)]
pub struct ResetRequest {
    #[serde(default)]
    pub reset: bool,
}

#[derive(Debug, Deserialize)]
pub struct UsernameRequest {
    pub username: String,
}

#[derive(Debug, Deserialize)]
pub struct TagResetRequest {
    pub tag: String,
    #[serde(default)]
    pub reset: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemStatsResponse {
    pub uptime: u64,
    pub num_cpu: usize,
}

#[derive(Debug, Serialize)]
pub struct UserStats {
    pub username: String,
    pub uplink: i64,
    pub downlink: i64,
}

#[derive(Debug, Serialize)]
pub struct UsersStatsResponse {
    pub users: Vec<UserStats>,
}

#[derive(Debug, Serialize)]
pub struct UserOnlineResponse {
    pub online: bool,
}

#[derive(Debug, Serialize)]
pub struct InboundStatsResponse {
    pub inbound: String,
    pub uplink: i64,
    pub downlink: i64,
}

#[derive(Debug, Serialize)]
pub struct OutboundStatsResponse {
    pub outbound: String,
    pub uplink: i64,
    pub downlink: i64,
}

#[derive(Debug, Serialize)]
pub struct AllInboundsStatsResponse {
    pub inbounds: Vec<InboundStatsResponse>,
}

#[derive(Debug, Serialize)]
pub struct AllOutboundsStatsResponse {
    pub outbounds: Vec<OutboundStatsResponse>,
}

#[derive(Debug, Serialize)]
pub struct CombinedStatsResponse {
    pub inbounds: Vec<InboundStatsResponse>,
    pub outbounds: Vec<OutboundStatsResponse>,
}

fn registry(state: &AppState) -> Option<Arc<dyn StatsRegistry>> {
    state.engine.instance().and_then(|i| i.stats().ok())
}

fn counter_value(registry: &dyn StatsRegistry, name: &str, reset: bool) -> i64 {
    if reset {
        registry
            .query(name, true)
            .into_iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
            .unwrap_or(0)
    } else {
        registry.get_counter(name).unwrap_or(0)
    }
}

/// Aggregate all `prefix` traffic counters into tag -> (uplink, downlink).
fn collect_traffic(
    registry: &dyn StatsRegistry,
    prefix: &str,
    reset: bool,
) -> HashMap<String, (i64, i64)> {
    let mut totals: HashMap<String, (i64, i64)> = HashMap::new();

    for (name, value) in registry.query(prefix, reset) {
        if !name.starts_with(prefix) {
            continue;
        }
        let parts: Vec<&str> = name.split(">>>").collect();
        if parts.len() < 4 || parts[2] != "traffic" {
            continue;
        }

        let entry = totals.entry(parts[1].to_owned()).or_default();
        match parts[3] {
            "uplink" => entry.0 = value,
            "downlink" => entry.1 = value,
            _ => {}
        }
    }

    totals
}

async fn handle_system_stats(State(state): State<AppState>) -> Response {
    ok(SystemStatsResponse {
        uptime: state.started_at.elapsed().as_secs(),
        num_cpu: std::thread::available_parallelism().map(usize::from).unwrap_or(1),
    })
}

async fn handle_users_stats(
    State(state): State<AppState>,
    payload: Result<Json<ResetRequest>, JsonRejection>,
) -> Response {
    let req = payload.map(|Json(r)| r).unwrap_or_default();

    let Some(registry) = registry(&state) else {
        return ok(UsersStatsResponse { users: Vec::new() });
    };

    let users = collect_traffic(registry.as_ref(), "user>>>", req.reset)
        .into_iter()
        .filter(|(_, (up, down))| *up > 0 || *down > 0)
        .map(|(username, (uplink, downlink))| UserStats {
            username,
            uplink,
            downlink,
        })
        .collect();

    ok(UsersStatsResponse { users })
}

async fn handle_user_online_status(
    State(state): State<AppState>,
    payload: Result<Json<UsernameRequest>, JsonRejection>,
) -> Response {
    let Ok(Json(req)) = payload else {
        return ok(UserOnlineResponse { online: false });
    };

    let online = registry(&state)
        .map(|r| {
            let name = format!("user>>>{}>>>online", req.username);
            counter_value(r.as_ref(), &name, false) > 0
        })
        .unwrap_or(false);

    ok(UserOnlineResponse { online })
}

async fn handle_inbound_stats(
    State(state): State<AppState>,
    payload: Result<Json<TagResetRequest>, JsonRejection>,
) -> Response {
    let Ok(Json(req)) = payload else {
        return ok(InboundStatsResponse {
            inbound: String::new(),
            uplink: 0,
            downlink: 0,
        });
    };

    let (uplink, downlink) = registry(&state)
        .map(|r| {
            let up = format!("inbound>>>{}>>>traffic>>>uplink", req.tag);
            let down = format!("inbound>>>{}>>>traffic>>>downlink", req.tag);
            (
                counter_value(r.as_ref(), &up, req.reset),
                counter_value(r.as_ref(), &down, req.reset),
            )
        })
        .unwrap_or((0, 0));

    ok(InboundStatsResponse {
        inbound: req.tag,
        uplink,
        downlink,
    })
}

async fn handle_outbound_stats(
    State(state): State<AppState>,
    payload: Result<Json<TagResetRequest>, JsonRejection>,
) -> Response {
    let Ok(Json(req)) = payload else {
        return ok(OutboundStatsResponse {
            outbound: String::new(),
            uplink: 0,
            downlink: 0,
        });
    };

    let (uplink, downlink) = registry(&state)
        .map(|r| {
            let up = format!("outbound>>>{}>>>traffic>>>uplink", req.tag);
            let down = format!("outbound>>>{}>>>traffic>>>downlink", req.tag);
            (
                counter_value(r.as_ref(), &up, req.reset),
                counter_value(r.as_ref(), &down, req.reset),
            )
        })
        .unwrap_or((0, 0));

    ok(OutboundStatsResponse {
        outbound: req.tag,
        uplink,
        downlink,
    })
}

fn inbound_entries(state: &AppState, reset: bool) -> Vec<InboundStatsResponse> {
    registry(state)
        .map(|r| {
            collect_traffic(r.as_ref(), "inbound>>>", reset)
                .into_iter()
                .map(|(inbound, (uplink, downlink))| InboundStatsResponse {
                    inbound,
                    uplink,
                    downlink,
                })
                .collect()
        })
        .unwrap_or_default()
}

fn outbound_entries(state: &AppState, reset: bool) -> Vec<OutboundStatsResponse> {
    registry(state)
        .map(|r| {
            collect_traffic(r.as_ref(), "outbound>>>", reset)
                .into_iter()
                .map(|(outbound, (uplink, downlink))| OutboundStatsResponse {
                    outbound,
                    uplink,
                    downlink,
                })
                .collect()
        })
        .unwrap_or_default()
}

async fn handle_all_inbounds_stats(
    State(state): State<AppState>,
    payload: Result<Json<ResetRequest>, JsonRejection>,
) -> Response {
    let req = payload.map(|Json(r)| r).unwrap_or_default();
    ok(AllInboundsStatsResponse {
        inbounds: inbound_entries(&state, req.reset),
    })
}

async fn handle_all_outbounds_stats(
    State(state): State<AppState>,
    payload: Result<Json<ResetRequest>, JsonRejection>,
) -> Response {
    let req = payload.map(|Json(r)| r).unwrap_or_default();
    ok(AllOutboundsStatsResponse {
        outbounds: outbound_entries(&state, req.reset),
    })
}

async fn handle_combined_stats(
    State(state): State<AppState>,
    payload: Result<Json<ResetRequest>, JsonRejection>,
) -> Response {
    let req = payload.map(|Json(r)| r).unwrap_or_default();
    ok(CombinedStatsResponse {
        inbounds: inbound_entries(&state, req.reset),
        outbounds: outbound_entries(&state, req.reset),
    })
}
