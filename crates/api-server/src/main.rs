//! API Server for the data-collection task engine
//!
//! Thin REST surface over the collection task service.

mod config;
mod routes;
mod state;

use std::net::SocketAddr;

use anyhow::Context;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::ServerConfig;
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "api_server=debug,job_runner=debug,dc_core=info,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::from_env();
    tracing::info!("Using data directory: {:?}", config.data_dir);
    tracing::info!(
        "Worker command: {} {}",
        config.worker.program,
        config.worker.args.join(" ")
    );

    let app_state = AppState::new(&config)
        .await
        .context("Failed to initialize application state")?;

    let recovered = app_state
        .coordinator()
        .recover_orphans()
        .await
        .context("Failed to recover interrupted executions")?;
    if recovered > 0 {
        tracing::warn!("Marked {} interrupted executions as FAILED", recovered);
    }

    let app = Router::new()
        .merge(routes::health::router())
        .merge(routes::task::router())
        .merge(routes::execution::router())
        .with_state(app_state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http());

    // Bind to 0.0.0.0 for localhost/127.0.0.1 compatibility
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("REST API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}
