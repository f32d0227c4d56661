//! Router assembly and serving.

use std::sync::Arc;

use axum::{middleware, Router};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::auth::{require_jwt, JwtVerifier};
use crate::state::AppState;
use crate::{handler, internal, lifecycle, stats, vision};

/// Panel-facing router. Every route sits behind the JWT middleware.
pub fn main_router(state: AppState, verifier: Arc<JwtVerifier>) -> Router {
    Router::new()
        .nest("/xray", lifecycle::routes())
        .nest("/handler", handler::routes())
        .nest("/vision", vision::routes())
        .nest("/stats", stats::routes())
        .layer(middleware::from_fn_with_state(verifier, require_jwt))
        .with_state(state)
}

/// Loopback router for sidecars. No auth; the caller binds it to 127.0.0.1
/// only.
pub fn internal_router(state: AppState) -> Router {
    Router::new()
        .nest("/internal", internal::routes())
        .nest("/vision", vision::routes())
        .with_state(state)
}

/// Serve `router` on `listener` until `shutdown` fires, then drain
/// gracefully.
pub async fn serve(
    listener: TcpListener,
    router: Router,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(addr = %addr, "API server listening");
    }

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}
