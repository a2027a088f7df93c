use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{Router, routing::get};
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use super::api::{self, AppState};
use super::assistant::HttpTextGenerator;
use super::db::{BoardDb, DbHandle};
use super::events::MemoryEventBus;
use super::gateway::Gateway;
use super::ws;
use crate::config::Config;

/// Build the full application router: JSON API, WebSocket fan-out, health.
pub fn build_router(state: Arc<AppState>) -> Router {
    api::api_router()
        .route("/ws/workspaces/{workspace_id}", get(ws::ws_handler))
        .with_state(state)
}

/// Wire the store, the event bus and the optional assistant into a gateway.
pub fn build_gateway(config: &Config, db: BoardDb) -> Gateway {
    let bus = Arc::new(MemoryEventBus::with_capacity(
        config.realtime.channel_capacity.max(1),
    ));
    let mut gateway =
        Gateway::new(DbHandle::new(db), bus).with_commit_mode(config.board.commit_mode);
    if config.assistant.is_enabled() {
        gateway = gateway.with_assistant(Arc::new(HttpTextGenerator::new(
            config.assistant.endpoint.clone(),
            config.assistant.model.clone(),
            config.assistant.api_key(),
        )));
    }
    gateway
}

/// Start the board server and run until Ctrl+C.
pub async fn start_server(config: Config) -> Result<()> {
    for warning in config.validate() {
        warn!("{}", warning);
    }

    let db = BoardDb::new(&config.server.db_path).with_context(|| {
        format!(
            "Failed to initialize board database at {}",
            config.server.db_path.display()
        )
    })?;
    let gateway = build_gateway(&config, db);
    let state = Arc::new(AppState { gateway });

    let mut app = build_router(state);
    if config.server.dev_mode {
        app = app.layer(CorsLayer::permissive());
    }

    let addr = format!("{}:{}", config.bind_host(), config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    info!(
        commit_mode = %config.board.commit_mode,
        assistant = config.assistant.is_enabled(),
        "linboard listening on http://{}",
        local_addr
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to install Ctrl+C handler: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutting down...");
}
