//! Source-IP blocking endpoints.
//!
//! A blocked IP becomes a dynamic routing rule steering the source to the
//! BLOCK outbound. The in-memory table is authoritative; the live router is
//! updated opportunistically when the engine is running, so a block issued
//! while stopped still answers success and is simply absent from the router
//! until the next start re-applies rules.

use std::net::IpAddr;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Json, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::routing::post;
use axum::Router;
use serde::Deserialize;
use sha2::{Digest, Sha224};
use tracing::{error, info, warn};

use crate::metrics;
use crate::response::{ok, wrap, OpOutcome};
use crate::state::AppState;

/// Outbound tag the injected rules point at.
pub const BLOCK_OUTBOUND: &str = "BLOCK";

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/block-ip", post(handle_block_ip))
        .route("/unblock-ip", post(handle_unblock_ip))
}

#[derive(Debug, Deserialize)]
pub struct BlockIpRequest {
    pub ip: String,
}

/// Rule tag for an IP: stable digest so block and unblock agree without
/// storing extra state on either side.
pub fn rule_tag(ip: &str) -> String {
    hex::encode(Sha224::digest(ip.as_bytes()))
}

fn parse_request(
    payload: Result<Json<BlockIpRequest>, JsonRejection>,
    endpoint: &str,
) -> Result<String, Response> {
    let req = match payload {
        Ok(Json(req)) => req,
        Err(e) => {
            error!(error = %e, endpoint, "failed to parse request");
            return Err(wrap(
                StatusCode::BAD_REQUEST,
                OpOutcome::failure(format!("invalid request body: {e}")),
            ));
        }
    };

    if req.ip.parse::<IpAddr>().is_err() {
        return Err(wrap(
            StatusCode::BAD_REQUEST,
            OpOutcome::failure("invalid IP address format"),
        ));
    }

    Ok(req.ip)
}

async fn handle_block_ip(
    State(state): State<AppState>,
    payload: Result<Json<BlockIpRequest>, JsonRejection>,
) -> Response {
    let ip = match parse_request(payload, "block-ip") {
        Ok(ip) => ip,
        Err(resp) => return resp,
    };

    let tag = rule_tag(&ip);
    let count = {
        let mut blocked = state.blocked_ips.write();
        blocked.insert(tag.clone(), ip.clone());
        blocked.len()
    };
    metrics::set_blocked_ips(count);

    if state.engine.is_running() {
        if let Err(e) = state.engine.add_routing_rule(&tag, &ip, BLOCK_OUTBOUND) {
            warn!(ip = %ip, error = %e, "could not install blocking rule in live router");
        }
    }

    info!(ip = %ip, rule = %tag, "IP blocked");
    ok(OpOutcome::success())
}

async fn handle_unblock_ip(
    State(state): State<AppState>,
    payload: Result<Json<BlockIpRequest>, JsonRejection>,
) -> Response {
    let ip = match parse_request(payload, "unblock-ip") {
        Ok(ip) => ip,
        Err(resp) => return resp,
    };

    let tag = rule_tag(&ip);
    let count = {
        let mut blocked = state.blocked_ips.write();
        blocked.remove(&tag);
        blocked.len()
    };
    metrics::set_blocked_ips(count);

    if state.engine.is_running() {
        // A rule that was never installed counts as removed.
        if let Err(e) = state.engine.remove_routing_rule(&tag) {
            warn!(ip = %ip, error = %e, "could not remove blocking rule from live router");
        }
    }

    info!(ip = %ip, rule = %tag, "IP unblocked");
    ok(OpOutcome::success())
}
