//! # xnode
//!
//! A control-plane node for panel-managed proxy engines. The panel pushes
//! full engine configurations plus per-inbound user fingerprints; the node
//! decides whether the running engine can absorb the push without a restart,
//! applies incremental user mutations between pushes, and exposes lifecycle,
//! stats and IP-blocking endpoints over an authenticated HTTP API.
//!
//! ## Crates
//!
//! - [`xnode_sync`] - Incremental fingerprint set and configuration mirror
//! - [`xnode_engine`] - Engine abstraction, lifecycle and user sync
//! - [`xnode_config`] - Process configuration and secret-key payload
//! - [`xnode_api`] - HTTP management API

pub use xnode_api as api;
pub use xnode_config as config;
pub use xnode_engine as engine;
pub use xnode_sync as sync;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use xnode_api::{internal_router, main_router, serve, AppState, JwtVerifier};
    pub use xnode_engine::{EngineBackend, EngineHandle, EngineInstance, InProcessEngine, UserSync};
    pub use xnode_sync::{ConfigManager, HashedSet, Hashes, InboundHash, Internals};
}
