//! Engine error types.

/// Errors surfaced by the engine boundary.
///
/// Lookup failures (`NoSuchInbound`, `CapabilityUnsupported`, `UserNotFound`)
/// are ordinary per-operation conditions; the caller decides whether they are
/// fatal. Lifecycle failures leave the handle not-running and safe to retry.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid engine configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to start engine: {0}")]
    StartFailed(String),

    #[error("failed to stop engine: {0}")]
    StopFailed(String),

    #[error("engine is not running")]
    NotRunning,

    #[error("no such inbound tag '{0}'")]
    NoSuchInbound(String),

    #[error("inbound '{tag}' does not support {capability}")]
    CapabilityUnsupported {
        tag: String,
        capability: &'static str,
    },

    #[error("user '{user}' not found in inbound '{tag}'")]
    UserNotFound { tag: String, user: String },

    #[error("invalid IP address: {0}")]
    InvalidAddress(String),

    #[error("routing rule error: {0}")]
    Rule(String),
}
