//! Monitoring GUI session server.
//!
//! This server:
//! - Creates browser sessions bound to the identity the front-end proxy
//!   reports
//! - Runs session calls one at a time per session
//! - Keeps session state on local disk so sessions survive restarts

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use monitor_gui_server::config::Config;
use monitor_gui_server::handlers::router;
use monitor_gui_server::workspace::BasicWorkspace;
use monitor_gui_server::{Plugins, ServerContext};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse();

    info!("Starting monitor-gui-server v{}", env!("CARGO_PKG_VERSION"));
    info!("  Host: {}", config.host);
    info!("  Port: {}", config.port);
    info!("  Sessions: {}", config.session_dir().display());
    info!("  Workspaces: {}", config.workspaces.join(", "));
    if let Some(instrument) = &config.instrument {
        info!("  Instrumented by: {}", instrument);
    }

    let plugins = config
        .workspaces
        .iter()
        .filter(|name| !name.is_empty())
        .fold(Plugins::builder(), |builder, name| {
            builder.workspace(Arc::new(BasicWorkspace::new(name.as_str())))
        })
        .build()?;

    let ctx = Arc::new(ServerContext::new(config.settings(), plugins)?);

    // Configure CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = router(ctx.clone())
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    // Bind and serve
    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("Listening on http://{}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    // Write out every queued session before exiting.
    ctx.shutdown().await;

    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Received Ctrl+C, initiating shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                info!("Received SIGTERM, initiating shutdown");
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
