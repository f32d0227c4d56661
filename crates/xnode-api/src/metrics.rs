//! Metrics instrumentation for the management API.

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Initialize Prometheus metrics exporter.
///
/// Starts an HTTP server on the given address to expose metrics.
/// Returns an error message if binding fails.
pub fn init_prometheus(listen: &str) -> Result<(), String> {
    let addr: SocketAddr = listen
        .parse()
        .map_err(|e| format!("invalid metrics listen address: {}", e))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("failed to install prometheus exporter: {}", e))?;

    Ok(())
}

/// Total number of engine (re)starts performed.
pub const ENGINE_RESTARTS_TOTAL: &str = "xnode_engine_restarts_total";
/// Total number of start requests answered without restarting.
pub const ENGINE_RESTARTS_SKIPPED_TOTAL: &str = "xnode_engine_restarts_skipped_total";
/// Total number of start requests rejected while another was in flight.
pub const START_CONFLICTS_TOTAL: &str = "xnode_start_conflicts_total";
/// Total number of user mutations by operation.
pub const USER_OPS_TOTAL: &str = "xnode_user_ops_total";
/// Number of currently blocked source IPs.
pub const BLOCKED_IPS: &str = "xnode_blocked_ips";

#[inline]
pub fn record_engine_restart() {
    counter!(ENGINE_RESTARTS_TOTAL).increment(1);
}

#[inline]
pub fn record_restart_skipped() {
    counter!(ENGINE_RESTARTS_SKIPPED_TOTAL).increment(1);
}

#[inline]
pub fn record_start_conflict() {
    counter!(START_CONFLICTS_TOTAL).increment(1);
}

/// Record a user mutation (op: "add" or "remove").
#[inline]
pub fn record_user_op(op: &'static str) {
    counter!(USER_OPS_TOTAL, "op" => op).increment(1);
}

#[inline]
pub fn set_blocked_ips(count: usize) {
    gauge!(BLOCKED_IPS).set(count as f64);
}
