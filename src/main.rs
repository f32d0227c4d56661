//! xnode entry point.
//!
//! Loads the process configuration, wires the engine handle and the
//! fingerprint mirror into the two API servers, and runs until a shutdown
//! signal arrives.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use xnode_api::{internal_router, main_router, serve, AppState, JwtVerifier};
use xnode_engine::{EngineHandle, InProcessEngine};
use xnode_sync::ConfigManager;

/// Panel-managed proxy node.
#[derive(Parser, Debug)]
#[command(name = "xnode", version, about = "Control-plane node for panel-managed proxy engines")]
struct Cli {
    /// Config file path (JSON). Falls back to the CONFIG_PATH environment
    /// variable, then to environment-only configuration.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Expose Prometheus metrics on this address (e.g. 127.0.0.1:9100).
    #[arg(long)]
    metrics_listen: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = match cli.config {
        Some(path) => xnode_config::load_with(Some(&path), |key| std::env::var(key).ok())?,
        None => xnode_config::load()?,
    };

    init_tracing(&config.log_level);

    if let Some(listen) = &cli.metrics_listen {
        match xnode_api::metrics::init_prometheus(listen) {
            Ok(()) => info!(listen = %listen, "metrics exporter listening"),
            Err(e) => warn!("failed to start metrics exporter: {}", e),
        }
    }

    let engine = Arc::new(EngineHandle::new(Arc::new(InProcessEngine::new())));
    let mirror = Arc::new(ConfigManager::new());
    let state = AppState::new(engine.clone(), mirror);
    let verifier = Arc::new(JwtVerifier::new(&config.payload.jwt_public_key)?);

    if let Some(dir) = xnode_engine::assets::asset_dir() {
        info!(dir = %dir.display(), "geo asset directory");
    }

    let main_listener = tokio::net::TcpListener::bind(("0.0.0.0", config.node_port)).await?;
    let internal_listener =
        tokio::net::TcpListener::bind(("127.0.0.1", config.internal_port)).await?;

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received");
        signal_token.cancel();
    });

    info!(
        node_port = config.node_port,
        internal_port = config.internal_port,
        "starting API servers"
    );

    let main_app = main_router(state.clone(), verifier);
    let internal_app = internal_router(state);

    let main_srv = serve(main_listener, main_app, shutdown.clone());
    let internal_srv = serve(internal_listener, internal_app, shutdown.clone());
    tokio::try_join!(main_srv, internal_srv)?;

    if let Err(e) = engine.stop() {
        error!(error = %e, "failed to stop engine during shutdown");
    }

    info!("node stopped");
    Ok(())
}

fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_owned()));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .init();
}

/// Wait for shutdown signals (SIGTERM, SIGINT).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
