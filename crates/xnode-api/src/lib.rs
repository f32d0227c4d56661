//! HTTP management API of the node.
//!
//! Two axum routers: the main router (panel-facing, JWT-protected) with the
//! lifecycle, handler, vision and stats controllers, and a loopback-only
//! internal router exposing the raw live configuration plus the vision
//! endpoints for sidecar processes.

pub mod auth;
pub mod handler;
pub mod internal;
pub mod lifecycle;
pub mod metrics;
pub mod response;
pub mod server;
pub mod state;
pub mod stats;
pub mod vision;

pub use auth::JwtVerifier;
pub use server::{internal_router, main_router, serve};
pub use state::AppState;

/// Version reported to the panel in `nodeInfo`.
pub const NODE_VERSION: &str = env!("CARGO_PKG_VERSION");
